//! A leased unit of device execution state.
//!
//! Each resource owns a pinned staging buffer (query batches are copied
//! through it) and a temporary scratch buffer (distance computation). Both
//! grow lazily up to their configured budget so idle pools stay cheap.

/// Buffers belonging to one pool slot while it sits idle.
#[derive(Debug)]
pub(crate) struct ResourceSlot {
    pub(crate) slot: usize,
    pub(crate) pinned: Vec<f32>,
    pub(crate) temp: Vec<f32>,
}

impl ResourceSlot {
    pub(crate) fn new(slot: usize) -> Self {
        Self {
            slot,
            pinned: Vec::new(),
            temp: Vec::new(),
        }
    }
}

/// Device resource owned by exactly one caller until released.
///
/// Obtained from [`DeviceResourceManager::acquire`](crate::DeviceResourceManager::acquire)
/// and handed back with [`DeviceResourceManager::release`](crate::DeviceResourceManager::release)
/// (or automatically through a [`ResourceHandle`](crate::ResourceHandle)).
#[derive(Debug)]
pub struct DeviceResource {
    pub(crate) device_id: i64,
    pub(crate) lease_id: u64,
    pub(crate) generation: u64,
    pub(crate) manager_id: u64,
    pub(crate) pinned_mem_bytes: usize,
    pub(crate) temp_mem_bytes: usize,
    pub(crate) slot: ResourceSlot,
}

impl DeviceResource {
    #[inline]
    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Pool slot index (stable across leases of the same buffers).
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot.slot
    }

    /// Unique id of this lease within its manager.
    #[inline]
    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }

    #[inline]
    pub fn pinned_mem_bytes(&self) -> usize {
        self.pinned_mem_bytes
    }

    #[inline]
    pub fn temp_mem_bytes(&self) -> usize {
        self.temp_mem_bytes
    }

    /// Rows of `row_len` floats that fit in one staging batch (at least one).
    pub fn staging_rows(&self, row_len: usize) -> usize {
        let row_bytes = row_len.max(1) * std::mem::size_of::<f32>();
        (self.pinned_mem_bytes / row_bytes).max(1)
    }

    /// Copy `batch` into the pinned buffer and hand out a scratch buffer of
    /// `scratch_len` floats alongside it.
    pub fn stage(&mut self, batch: &[f32], scratch_len: usize) -> (&[f32], &mut Vec<f32>) {
        let slot = &mut self.slot;
        slot.pinned.clear();
        slot.pinned.extend_from_slice(batch);
        if slot.temp.len() < scratch_len {
            slot.temp.resize(scratch_len, 0.0);
        }
        (&slot.pinned, &mut slot.temp)
    }

    /// Bytes currently backing the two buffers.
    pub fn resident_bytes(&self) -> usize {
        (self.slot.pinned.capacity() + self.slot.temp.capacity()) * std::mem::size_of::<f32>()
    }

    pub(crate) fn into_slot(self) -> ResourceSlot {
        let mut slot = self.slot;
        let pinned_cap = self.pinned_mem_bytes / std::mem::size_of::<f32>();
        let temp_cap = self.temp_mem_bytes / std::mem::size_of::<f32>();
        // Oversized single-row batches may have grown past the budget.
        if slot.pinned.capacity() > pinned_cap {
            slot.pinned = Vec::new();
        }
        if slot.temp.capacity() > temp_cap {
            slot.temp = Vec::new();
        }
        slot
    }
}
