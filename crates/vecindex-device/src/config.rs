//! Device pool configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use vecindex_core::{IndexError, IndexResult};

/// Default pinned staging memory per resource (64MB).
pub const DEFAULT_PINNED_MEM_BYTES: usize = 64 * 1024 * 1024;
/// Default temporary memory per resource (128MB).
pub const DEFAULT_TEMP_MEM_BYTES: usize = 128 * 1024 * 1024;
/// Default number of interchangeable resources per device.
pub const DEFAULT_RESOURCE_COUNT: usize = 2;

/// Pool parameters for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Non-negative device ordinal.
    pub device_id: i64,
    /// Pinned host staging memory per resource, in bytes.
    #[serde(default = "default_pinned")]
    pub pinned_mem_bytes: usize,
    /// Temporary device memory per resource, in bytes.
    #[serde(default = "default_temp")]
    pub temp_mem_bytes: usize,
    /// Number of resources that may be leased concurrently.
    #[serde(default = "default_count")]
    pub resource_count: usize,
}

fn default_pinned() -> usize {
    DEFAULT_PINNED_MEM_BYTES
}

fn default_temp() -> usize {
    DEFAULT_TEMP_MEM_BYTES
}

fn default_count() -> usize {
    DEFAULT_RESOURCE_COUNT
}

impl DeviceConfig {
    pub fn new(
        device_id: i64,
        pinned_mem_bytes: usize,
        temp_mem_bytes: usize,
        resource_count: usize,
    ) -> Self {
        Self {
            device_id,
            pinned_mem_bytes,
            temp_mem_bytes,
            resource_count,
        }
    }

    /// Defaults for the given device.
    pub fn for_device(device_id: i64) -> Self {
        Self::new(
            device_id,
            DEFAULT_PINNED_MEM_BYTES,
            DEFAULT_TEMP_MEM_BYTES,
            DEFAULT_RESOURCE_COUNT,
        )
    }

    /// Validate configuration.
    pub fn validate(&self) -> IndexResult<()> {
        if self.device_id < 0 {
            return Err(IndexError::InvalidDevice(self.device_id));
        }
        if self.resource_count == 0 {
            return Err(IndexError::config("resource_count must be > 0"));
        }
        if self.pinned_mem_bytes < std::mem::size_of::<f32>() {
            return Err(IndexError::config(format!(
                "pinned_mem_bytes must hold at least one f32, got {}",
                self.pinned_mem_bytes
            )));
        }
        Ok(())
    }
}

/// Pools to register at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceManagerConfig {
    pub devices: Vec<DeviceConfig>,
}

impl DeviceManagerConfig {
    /// Parse from JSON text.
    pub fn from_json(json: &str) -> IndexResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Validate every device entry and reject duplicate ids.
    pub fn validate(&self) -> IndexResult<()> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !seen.insert(device.device_id) {
                return Err(IndexError::config(format!(
                    "device {} configured more than once",
                    device.device_id
                )));
            }
        }
        Ok(())
    }
}
