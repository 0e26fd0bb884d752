//! CPU/GPU migration of built indexes.
//!
//! A copy shares the trained structure with its source (centroids, lists and
//! vector chunks are reference counted). Only the execution binding changes.

use std::sync::Arc;

use tracing::info;

use vecindex_core::{keys, Config, IndexError, IndexMode, IndexResult};
use vecindex_device::DeviceResourceManager;

use crate::index::{DeviceBinding, Index};

fn require_built(index: &Index) -> IndexResult<()> {
    if index.state().is_built() {
        Ok(())
    } else {
        Err(IndexError::IndexNotBuilt)
    }
}

fn require_mode(index: &Index, mode: IndexMode) -> IndexResult<()> {
    if index.mode() == mode {
        Ok(())
    } else {
        Err(IndexError::config(format!(
            "expected a {} index, got {}",
            mode,
            index.mode()
        )))
    }
}

/// Copy a built CPU index onto `device_id`.
///
/// A lease on the device is taken before the structure is transferred and
/// held until the copy exists; the copy leases per operation afterwards. A
/// `gpu_id` in `config`, if present, must name the same device.
///
/// # Errors
///
/// - `IndexNotBuilt` if the source holds no rows
/// - `InvalidConfig` for a GPU source or a conflicting `gpu_id`
/// - `InvalidDevice` for a negative or uninitialized device
/// - `UnsupportedMode` if the kind has no GPU backend
pub fn copy_cpu_to_gpu(
    index: &Index,
    manager: &Arc<DeviceResourceManager>,
    device_id: i64,
    config: &Config,
) -> IndexResult<Index> {
    require_built(index)?;
    require_mode(index, IndexMode::Cpu)?;
    if let Some(gpu_id) = config.get_i64(keys::GPU_ID)? {
        if gpu_id != device_id {
            return Err(IndexError::config(format!(
                "gpu_id {} conflicts with target device {}",
                gpu_id, device_id
            )));
        }
    }

    let mut lease = manager.acquire_guard(device_id)?;
    let backend = index.backend().clone_for_device(IndexMode::Gpu)?;
    let copy = index.derive(
        IndexMode::Gpu,
        backend,
        Some(DeviceBinding {
            manager: Arc::clone(manager),
            device_id,
        }),
    );
    lease.release()?;

    info!(
        index_type = %copy.index_type(),
        device_id,
        count = copy.count(),
        "Copied index to device"
    );
    Ok(copy)
}

/// Copy a built GPU index back to host execution.
///
/// Never touches the device manager, so it succeeds after the device pool
/// was freed.
///
/// # Errors
///
/// - `IndexNotBuilt` if the source holds no rows
/// - `InvalidConfig` for a CPU source
pub fn copy_gpu_to_cpu(index: &Index) -> IndexResult<Index> {
    require_built(index)?;
    require_mode(index, IndexMode::Gpu)?;

    let backend = index.backend().clone_for_device(IndexMode::Cpu)?;
    let copy = index.derive(IndexMode::Cpu, backend, None);
    info!(
        index_type = %copy.index_type(),
        device_id = ?index.device_id(),
        count = copy.count(),
        "Copied index to host"
    );
    Ok(copy)
}
