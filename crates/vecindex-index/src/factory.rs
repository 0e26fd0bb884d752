//! Index kind registry.
//!
//! Maps an [`IndexType`] name to a backend constructor plus the execution
//! modes it supports.
//!
//! | Kind | CPU | GPU |
//! |------|-----|-----|
//! | `FLAT` | yes | yes |
//! | `IVF_FLAT` | yes | yes |
//! | `IVF_SQ8` | yes | yes |
//! | `HNSW` | yes | no |
//!
//! Creating an index never touches the device manager. GPU-mode indexes
//! lease resources per operation, starting with `train`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use vecindex_core::{index_enum, Config, IndexError, IndexMode, IndexResult, IndexType};
use vecindex_device::DeviceResourceManager;

use crate::backend::{AnnBackend, FlatBackend, HnswBackend, IvfFlatBackend, IvfSq8Backend};
use crate::index::{DeviceBinding, Index};

/// Device used by GPU-mode indexes unless `gpu_id` says otherwise at train.
pub const DEFAULT_DEVICE_ID: i64 = 0;

/// Registry entry for one index kind.
#[derive(Clone, Copy)]
pub struct BackendEntry {
    pub name: &'static str,
    pub cpu: bool,
    pub gpu: bool,
    pub build: fn() -> Box<dyn AnnBackend>,
}

impl BackendEntry {
    pub fn supports(&self, mode: IndexMode) -> bool {
        match mode {
            IndexMode::Cpu => self.cpu,
            IndexMode::Gpu => self.gpu,
        }
    }
}

impl std::fmt::Debug for BackendEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendEntry")
            .field("name", &self.name)
            .field("cpu", &self.cpu)
            .field("gpu", &self.gpu)
            .finish()
    }
}

fn flat() -> Box<dyn AnnBackend> {
    Box::new(FlatBackend::new())
}

fn ivf_flat() -> Box<dyn AnnBackend> {
    Box::new(IvfFlatBackend::new())
}

fn ivf_sq8() -> Box<dyn AnnBackend> {
    Box::new(IvfSq8Backend::new())
}

fn hnsw() -> Box<dyn AnnBackend> {
    Box::new(HnswBackend::new())
}

/// Built-in kinds.
pub const DEFAULT_BACKENDS: [BackendEntry; 4] = [
    BackendEntry { name: index_enum::FLAT, cpu: true, gpu: true, build: flat },
    BackendEntry { name: index_enum::IVF_FLAT, cpu: true, gpu: true, build: ivf_flat },
    BackendEntry { name: index_enum::IVF_SQ8, cpu: true, gpu: true, build: ivf_sq8 },
    BackendEntry { name: index_enum::HNSW, cpu: true, gpu: false, build: hnsw },
];

/// Creates indexes by kind name and mode.
#[derive(Debug, Default)]
pub struct IndexFactory {
    registry: HashMap<String, BackendEntry>,
    devices: Option<Arc<DeviceResourceManager>>,
}

impl IndexFactory {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding [`DEFAULT_BACKENDS`].
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        for entry in DEFAULT_BACKENDS {
            factory.register(entry);
        }
        factory
    }

    /// Add or replace a kind.
    pub fn register(&mut self, entry: BackendEntry) {
        if self.registry.insert(entry.name.to_string(), entry).is_some() {
            debug!(index_type = entry.name, "Replaced registered backend");
        }
    }

    /// Bind GPU-mode indexes to `manager`.
    pub fn with_device_manager(mut self, manager: Arc<DeviceResourceManager>) -> Self {
        self.devices = Some(manager);
        self
    }

    pub fn device_manager(&self) -> Option<&Arc<DeviceResourceManager>> {
        self.devices.as_ref()
    }

    /// Whether `index_type` is registered for `mode`.
    pub fn supports(&self, index_type: &str, mode: IndexMode) -> bool {
        self.registry
            .get(index_type)
            .map_or(false, |e| e.supports(mode))
    }

    /// Registered kind names, sorted.
    pub fn index_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn entry(&self, index_type: &str) -> IndexResult<&BackendEntry> {
        self.registry
            .get(index_type)
            .ok_or_else(|| IndexError::UnsupportedIndexKind(index_type.to_string()))
    }

    /// Check a train config for `index_type` without building anything.
    pub fn validate_config(&self, index_type: &str, config: &Config) -> IndexResult<()> {
        (self.entry(index_type)?.build)().validate_config(config)
    }

    /// A new untrained index.
    ///
    /// # Errors
    ///
    /// - `UnsupportedIndexKind` for unregistered names
    /// - `UnsupportedMode` if the kind has no implementation for `mode`
    /// - `InvalidConfig` for GPU mode without a device manager
    pub fn create(&self, index_type: &str, mode: IndexMode) -> IndexResult<Index> {
        let entry = self.entry(index_type)?;
        if !entry.supports(mode) {
            return Err(IndexError::UnsupportedMode {
                index_type: index_type.to_string(),
                mode: mode.to_string(),
            });
        }
        let device = match mode {
            IndexMode::Cpu => None,
            IndexMode::Gpu => {
                let manager = self.devices.as_ref().ok_or_else(|| {
                    IndexError::config("GPU mode requires a device resource manager")
                })?;
                Some(DeviceBinding {
                    manager: Arc::clone(manager),
                    device_id: DEFAULT_DEVICE_ID,
                })
            }
        };
        debug!(index_type, mode = %mode, "Creating index");
        Ok(Index::new(
            IndexType::from(index_type),
            mode,
            entry.build,
            device,
        ))
    }
}
