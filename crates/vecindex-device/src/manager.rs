//! Device Resource Manager: bounded pools of leasable device resources.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------+
//! | DeviceResourceManager         |
//! +-------------------------------+
//! | pools: RwLock<HashMap<        |
//! |   device_id,                  |
//! |   Arc<DevicePool>             |   Mutex<PoolState> + Condvar
//! | >>                            |
//! +-------------------------------+
//!         |
//!         v
//! +------+------+------+
//! | res0 | res1 | .... |   resource_count slots per device
//! +------+------+------+
//! ```
//!
//! `acquire` blocks the calling thread while a pool is exhausted; that is the
//! backpressure bounding concurrent device work, not an error. There is no
//! cancellation of a blocked `acquire`: callers needing a deadline use
//! [`DeviceResourceManager::acquire_timeout`], which gives up without
//! touching pool state.
//!
//! Every pool carries a generation. `free` (and re-initializing a device)
//! retires the generation, wakes blocked callers with `InvalidDevice` and
//! turns outstanding leases stale. Releasing a stale lease is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vecindex_core::{IndexError, IndexResult};

use crate::config::{DeviceConfig, DeviceManagerConfig};
use crate::resource::{DeviceResource, ResourceSlot};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Utilization of one device pool at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub device_id: i64,
    pub generation: u64,
    pub resource_count: usize,
    pub in_use: usize,
    pub free: usize,
    pub pinned_mem_bytes: usize,
    pub temp_mem_bytes: usize,
    /// Leases granted since the pool was created.
    pub total_acquires: u64,
    /// Acquires that had to wait for a release.
    pub blocked_acquires: u64,
}

impl PoolStats {
    /// Leased share of the pool, 0-100.
    pub fn usage_percent(&self) -> f64 {
        if self.resource_count == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.resource_count as f64) * 100.0
    }

    /// Whether the next `acquire` would block.
    pub fn is_exhausted(&self) -> bool {
        self.free == 0
    }
}

struct PoolState {
    idle: Vec<ResourceSlot>,
    leased: HashMap<u64, usize>,
    closed: bool,
    total_acquires: u64,
    blocked_acquires: u64,
}

struct DevicePool {
    config: DeviceConfig,
    generation: u64,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl DevicePool {
    fn new(config: DeviceConfig, generation: u64) -> Self {
        let idle = (0..config.resource_count).map(ResourceSlot::new).collect();
        Self {
            config,
            generation,
            state: Mutex::new(PoolState {
                idle,
                leased: HashMap::new(),
                closed: false,
                total_acquires: 0,
                blocked_acquires: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Mark closed and wake every waiter.
    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.idle.clear();
        self.available.notify_all();
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            device_id: self.config.device_id,
            generation: self.generation,
            resource_count: self.config.resource_count,
            in_use: state.leased.len(),
            free: state.idle.len(),
            pinned_mem_bytes: self.config.pinned_mem_bytes,
            temp_mem_bytes: self.config.temp_mem_bytes,
            total_acquires: state.total_acquires,
            blocked_acquires: state.blocked_acquires,
        }
    }
}

/// Process-wide pool of device resources, keyed by device id.
///
/// An explicit service object: create one, `init_device` each device, share
/// it as `Arc<DeviceResourceManager>` with everything that needs leases, and
/// `free` it at teardown. Acquire and release are internally synchronized so
/// concurrent leases never share a resource.
///
/// # Example
///
/// ```
/// use vecindex_device::{DeviceConfig, DeviceResourceManager};
///
/// let manager = DeviceResourceManager::new();
/// manager.init_device(DeviceConfig::new(0, 1024, 1024, 1)).unwrap();
///
/// let res = manager.acquire(0).unwrap();
/// assert_eq!(res.device_id(), 0);
/// assert!(manager.stats(0).unwrap().is_exhausted());
///
/// manager.release(res).unwrap();
/// assert_eq!(manager.stats(0).unwrap().free, 1);
///
/// assert!(manager.acquire(-1).is_err());
/// manager.free();
/// ```
pub struct DeviceResourceManager {
    id: u64,
    pools: RwLock<HashMap<i64, Arc<DevicePool>>>,
    next_generation: AtomicU64,
    next_lease: AtomicU64,
}

impl DeviceResourceManager {
    pub fn new() -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            pools: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Manager with every configured device already initialized.
    pub fn from_config(config: &DeviceManagerConfig) -> IndexResult<Self> {
        config.validate()?;
        let manager = Self::new();
        for device in &config.devices {
            manager.init_device(device.clone())?;
        }
        Ok(manager)
    }

    /// Register a pool of `resource_count` interchangeable resources.
    ///
    /// Re-initializing a device replaces its pool; leases from the old pool
    /// become stale.
    ///
    /// # Errors
    ///
    /// `InvalidDevice` for a negative id, `InvalidConfig` for an empty pool.
    pub fn init_device(&self, config: DeviceConfig) -> IndexResult<()> {
        config.validate()?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let device_id = config.device_id;

        info!(
            device_id,
            generation,
            resource_count = config.resource_count,
            pinned_mem_bytes = config.pinned_mem_bytes,
            temp_mem_bytes = config.temp_mem_bytes,
            "Initialized device resource pool"
        );

        let pool = Arc::new(DevicePool::new(config, generation));
        let replaced = self.pools.write().insert(device_id, pool);
        if let Some(old) = replaced {
            warn!(device_id, old_generation = old.generation, "Replaced existing device pool");
            old.close();
        }
        Ok(())
    }

    /// Release every pool. Blocked `acquire` calls fail with `InvalidDevice`
    /// and outstanding leases become stale.
    pub fn free(&self) {
        let pools: Vec<Arc<DevicePool>> = self.pools.write().drain().map(|(_, p)| p).collect();
        for pool in &pools {
            pool.close();
        }
        info!(pools = pools.len(), "Freed device resource pools");
    }

    /// Whether `device_id` has a live pool.
    pub fn is_initialized(&self, device_id: i64) -> bool {
        device_id >= 0 && self.pools.read().contains_key(&device_id)
    }

    /// Initialized device ids in ascending order.
    pub fn devices(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.pools.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn pool(&self, device_id: i64) -> IndexResult<Arc<DevicePool>> {
        if device_id < 0 {
            return Err(IndexError::InvalidDevice(device_id));
        }
        self.pools
            .read()
            .get(&device_id)
            .cloned()
            .ok_or(IndexError::InvalidDevice(device_id))
    }

    fn lease(&self, pool: &DevicePool, state: &mut PoolState, slot: ResourceSlot) -> DeviceResource {
        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        state.leased.insert(lease_id, slot.slot);
        state.total_acquires += 1;
        debug!(
            device_id = pool.config.device_id,
            slot = slot.slot,
            lease_id,
            in_use = state.leased.len(),
            "Acquired device resource"
        );
        DeviceResource {
            device_id: pool.config.device_id,
            lease_id,
            generation: pool.generation,
            manager_id: self.id,
            pinned_mem_bytes: pool.config.pinned_mem_bytes,
            temp_mem_bytes: pool.config.temp_mem_bytes,
            slot,
        }
    }

    /// Lease a resource, blocking while the pool is exhausted.
    ///
    /// # Errors
    ///
    /// `InvalidDevice` if the id is negative, was never initialized, or its
    /// pool is freed while waiting.
    pub fn acquire(&self, device_id: i64) -> IndexResult<DeviceResource> {
        let pool = self.pool(device_id)?;
        let mut state = pool.state.lock();
        let mut waited = false;
        loop {
            if state.closed {
                return Err(IndexError::InvalidDevice(device_id));
            }
            if let Some(slot) = state.idle.pop() {
                if waited {
                    state.blocked_acquires += 1;
                }
                return Ok(self.lease(&pool, &mut state, slot));
            }
            if !waited {
                debug!(device_id, "Device pool exhausted, waiting for release");
            }
            waited = true;
            pool.available.wait(&mut state);
        }
    }

    /// Lease a resource if one is idle right now.
    pub fn try_acquire(&self, device_id: i64) -> IndexResult<Option<DeviceResource>> {
        let pool = self.pool(device_id)?;
        let mut state = pool.state.lock();
        if state.closed {
            return Err(IndexError::InvalidDevice(device_id));
        }
        Ok(state
            .idle
            .pop()
            .map(|slot| self.lease(&pool, &mut state, slot)))
    }

    /// Lease a resource, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` on timeout; pool state is left untouched.
    pub fn acquire_timeout(
        &self,
        device_id: i64,
        timeout: Duration,
    ) -> IndexResult<Option<DeviceResource>> {
        let deadline = Instant::now() + timeout;
        let pool = self.pool(device_id)?;
        let mut state = pool.state.lock();
        let mut waited = false;
        loop {
            if state.closed {
                return Err(IndexError::InvalidDevice(device_id));
            }
            if let Some(slot) = state.idle.pop() {
                if waited {
                    state.blocked_acquires += 1;
                }
                return Ok(Some(self.lease(&pool, &mut state, slot)));
            }
            waited = true;
            if pool.available.wait_until(&mut state, deadline).timed_out() {
                if let Some(slot) = state.idle.pop() {
                    state.blocked_acquires += 1;
                    return Ok(Some(self.lease(&pool, &mut state, slot)));
                }
                debug!(device_id, ?timeout, "Device acquire timed out");
                return Ok(None);
            }
        }
    }

    /// Lease a resource wrapped in a handle that releases it on drop.
    pub fn acquire_guard(self: &Arc<Self>, device_id: i64) -> IndexResult<ResourceHandle> {
        let resource = self.acquire(device_id)?;
        Ok(ResourceHandle {
            manager: Arc::clone(self),
            resource: Some(resource),
        })
    }

    /// Return a resource to its pool.
    ///
    /// Releasing a lease whose pool was freed or replaced is a no-op.
    ///
    /// # Errors
    ///
    /// `ResourceMisuse` if the resource was issued by another manager or its
    /// lease is not outstanding.
    pub fn release(&self, resource: DeviceResource) -> IndexResult<()> {
        if resource.manager_id != self.id {
            return Err(IndexError::ResourceMisuse(format!(
                "lease {} for device {} was issued by another manager",
                resource.lease_id, resource.device_id
            )));
        }

        let pool = match self.pools.read().get(&resource.device_id).cloned() {
            Some(pool) if pool.generation == resource.generation => pool,
            _ => {
                warn!(
                    device_id = resource.device_id,
                    lease_id = resource.lease_id,
                    "Released lease from a freed device pool; dropping it"
                );
                return Ok(());
            }
        };

        let mut state = pool.state.lock();
        if state.closed {
            return Ok(());
        }
        if state.leased.remove(&resource.lease_id).is_none() {
            return Err(IndexError::ResourceMisuse(format!(
                "lease {} for device {} is not outstanding",
                resource.lease_id, resource.device_id
            )));
        }

        let lease_id = resource.lease_id;
        let slot = resource.into_slot();
        debug!(
            device_id = pool.config.device_id,
            slot = slot.slot,
            lease_id,
            "Released device resource"
        );
        state.idle.push(slot);
        pool.available.notify_one();
        Ok(())
    }

    /// Utilization of one device, or `None` if it has no live pool.
    pub fn stats(&self, device_id: i64) -> Option<PoolStats> {
        self.pools.read().get(&device_id).map(|p| p.stats())
    }

    /// Per-device utilization, sorted by device id.
    pub fn all_stats(&self) -> Vec<PoolStats> {
        let pools: Vec<Arc<DevicePool>> = self.pools.read().values().cloned().collect();
        let mut stats: Vec<PoolStats> = pools.iter().map(|p| p.stats()).collect();
        stats.sort_by_key(|s| s.device_id);
        stats
    }

    /// [`all_stats`](Self::all_stats), with each pool also logged.
    pub fn dump(&self) -> Vec<PoolStats> {
        let stats = self.all_stats();
        for s in &stats {
            info!(
                device_id = s.device_id,
                generation = s.generation,
                in_use = s.in_use,
                free = s.free,
                total_acquires = s.total_acquires,
                blocked_acquires = s.blocked_acquires,
                "Device pool"
            );
        }
        stats
    }
}

impl Default for DeviceResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceResourceManager")
            .field("id", &self.id)
            .field("pools", &self.all_stats())
            .finish()
    }
}

/// RAII lease: releases its resource when dropped.
pub struct ResourceHandle {
    manager: Arc<DeviceResourceManager>,
    resource: Option<DeviceResource>,
}

impl ResourceHandle {
    /// The leased resource.
    ///
    /// # Errors
    ///
    /// `ResourceMisuse` after the guard was released.
    pub fn resource_mut(&mut self) -> IndexResult<&mut DeviceResource> {
        self.resource
            .as_mut()
            .ok_or_else(|| IndexError::ResourceMisuse("resource already released".to_string()))
    }

    pub fn device_id(&self) -> Option<i64> {
        self.resource.as_ref().map(DeviceResource::device_id)
    }

    /// Lease id of the held resource; `None` once released.
    pub fn lease_id(&self) -> Option<u64> {
        self.resource.as_ref().map(DeviceResource::lease_id)
    }

    pub fn is_released(&self) -> bool {
        self.resource.is_none()
    }

    /// Return the resource now.
    ///
    /// # Errors
    ///
    /// `ResourceMisuse` when called a second time.
    pub fn release(&mut self) -> IndexResult<()> {
        match self.resource.take() {
            Some(resource) => self.manager.release(resource),
            None => Err(IndexError::ResourceMisuse(
                "resource released twice".to_string(),
            )),
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if let Err(e) = self.manager.release(resource) {
                warn!("Failed to release device resource on drop: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("resource", &self.resource)
            .finish()
    }
}

static_assertions::assert_impl_all!(DeviceResourceManager: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(device_id: i64, count: usize) -> DeviceResourceManager {
        let m = DeviceResourceManager::new();
        m.init_device(DeviceConfig::new(device_id, 4096, 4096, count))
            .unwrap();
        m
    }

    #[test]
    fn test_acquire_invalid_device() {
        let m = manager_with(0, 1);
        assert!(matches!(m.acquire(-1), Err(IndexError::InvalidDevice(-1))));
        assert!(matches!(m.acquire(3), Err(IndexError::InvalidDevice(3))));
        assert!(matches!(m.try_acquire(-5), Err(IndexError::InvalidDevice(-5))));
    }

    #[test]
    fn test_init_rejects_negative_device() {
        let m = DeviceResourceManager::new();
        assert!(matches!(
            m.init_device(DeviceConfig::new(-1, 1024, 1024, 1)),
            Err(IndexError::InvalidDevice(-1))
        ));
        assert!(!m.is_initialized(-1));
    }

    #[test]
    fn test_leases_are_distinct() {
        let m = manager_with(0, 3);
        let a = m.acquire(0).unwrap();
        let b = m.acquire(0).unwrap();
        let c = m.acquire(0).unwrap();
        let mut slots = vec![a.slot(), b.slot(), c.slot()];
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
        assert!(m.try_acquire(0).unwrap().is_none());
        m.release(a).unwrap();
        m.release(b).unwrap();
        m.release(c).unwrap();
        assert_eq!(m.dump()[0].free, 3);
    }

    #[test]
    fn test_release_to_other_manager_is_misuse() {
        let m1 = manager_with(0, 1);
        let m2 = manager_with(0, 1);
        let res = m1.acquire(0).unwrap();
        assert!(matches!(m2.release(res), Err(IndexError::ResourceMisuse(_))));
    }

    #[test]
    fn test_handle_double_release() {
        let m = Arc::new(manager_with(0, 1));
        let mut guard = m.acquire_guard(0).unwrap();
        assert_eq!(guard.device_id(), Some(0));
        assert!(guard.lease_id().is_some());
        guard.release().unwrap();
        assert!(guard.is_released());
        assert_eq!(guard.lease_id(), None);
        assert!(matches!(guard.release(), Err(IndexError::ResourceMisuse(_))));
        assert!(matches!(guard.resource_mut(), Err(IndexError::ResourceMisuse(_))));
        assert_eq!(m.dump()[0].free, 1);
    }

    #[test]
    fn test_handle_releases_on_drop() {
        let m = Arc::new(manager_with(0, 1));
        {
            let _guard = m.acquire_guard(0).unwrap();
            assert_eq!(m.dump()[0].in_use, 1);
        }
        assert_eq!(m.dump()[0].in_use, 0);
    }

    #[test]
    fn test_release_after_free_is_noop() {
        let m = manager_with(0, 1);
        let res = m.acquire(0).unwrap();
        m.free();
        assert!(m.release(res).is_ok());
        assert!(m.dump().is_empty());
        assert!(matches!(m.acquire(0), Err(IndexError::InvalidDevice(0))));
    }

    #[test]
    fn test_reinit_makes_old_leases_stale() {
        let m = manager_with(0, 1);
        let old = m.acquire(0).unwrap();
        m.init_device(DeviceConfig::new(0, 1024, 1024, 2)).unwrap();
        m.release(old).unwrap();
        let snap = &m.dump()[0];
        assert_eq!(snap.resource_count, 2);
        assert_eq!(snap.free, 2);
        assert_eq!(snap.in_use, 0);
    }

    #[test]
    fn test_acquire_timeout_leaves_pool_untouched() {
        let m = manager_with(0, 1);
        let held = m.acquire(0).unwrap();
        let got = m.acquire_timeout(0, Duration::from_millis(20)).unwrap();
        assert!(got.is_none());
        let snap = &m.dump()[0];
        assert_eq!(snap.in_use, 1);
        assert_eq!(snap.total_acquires, 1);
        m.release(held).unwrap();
        assert!(m.acquire_timeout(0, Duration::from_millis(20)).unwrap().is_some());
    }

    #[test]
    fn test_stats() {
        let m = manager_with(0, 4);
        assert!(m.stats(1).is_none());
        assert!(m.stats(-1).is_none());

        let a = m.acquire(0).unwrap();
        let stats = m.stats(0).unwrap();
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.free, 3);
        assert_eq!(stats.usage_percent(), 25.0);
        assert!(!stats.is_exhausted());
        assert_eq!(m.all_stats(), vec![stats]);

        let rest: Vec<_> = (0..3).map(|_| m.acquire(0).unwrap()).collect();
        assert!(m.stats(0).unwrap().is_exhausted());
        assert_eq!(m.stats(0).unwrap().usage_percent(), 100.0);
        m.release(a).unwrap();
        for r in rest {
            m.release(r).unwrap();
        }
        assert_eq!(m.stats(0).unwrap().total_acquires, 4);
    }

    #[test]
    fn test_from_config() {
        let config = DeviceManagerConfig {
            devices: vec![DeviceConfig::new(0, 1024, 1024, 1), DeviceConfig::new(2, 1024, 1024, 1)],
        };
        let m = DeviceResourceManager::from_config(&config).unwrap();
        assert_eq!(m.devices(), vec![0, 2]);
        assert!(m.is_initialized(2));
        assert!(!m.is_initialized(1));
    }
}
