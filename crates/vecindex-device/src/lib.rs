//! Device Resource Manager for the vecindex runtime.
//!
//! GPU temporary memory and pinned staging buffers are expensive to set up per
//! query. This crate pools them per device and leases them to one caller at a
//! time, which also bounds how much device work runs concurrently.
//!
//! # Architecture
//!
//! - **config**: `DeviceConfig` per pool, `DeviceManagerConfig` loaded from JSON
//! - **resource**: `DeviceResource`, the leased pinned + scratch buffers
//! - **manager**: `DeviceResourceManager` (init/acquire/release/free/dump),
//!   per-device `PoolStats` and the RAII `ResourceHandle`
//!
//! The manager is an explicit service object. Share it as
//! `Arc<DeviceResourceManager>`; nothing here is global.

pub mod config;
pub mod manager;
pub mod resource;

pub use config::{
    DeviceConfig, DeviceManagerConfig, DEFAULT_PINNED_MEM_BYTES, DEFAULT_RESOURCE_COUNT,
    DEFAULT_TEMP_MEM_BYTES,
};
pub use manager::{DeviceResourceManager, PoolStats, ResourceHandle};
pub use resource::DeviceResource;
