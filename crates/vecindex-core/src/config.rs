//! String-keyed parameter bag passed to train, serialize and query.
//!
//! Keys are backend specific; unrecognized keys are ignored. Typed getters
//! report wrongly-typed values as [`IndexError::InvalidConfig`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::types::Metric;

/// Recognized parameter names.
pub mod keys {
    pub const DIM: &str = "dim";
    pub const METRIC: &str = "metric";
    pub const TOPK: &str = "k";
    /// Alternate spelling of [`TOPK`].
    pub const TOPK_ALIAS: &str = "topK";
    pub const NLIST: &str = "nlist";
    pub const NPROBE: &str = "nprobe";
    pub const NITER: &str = "niter";
    pub const SEED: &str = "seed";
    pub const HNSW_M: &str = "M";
    pub const EF_CONSTRUCTION: &str = "efConstruction";
    pub const EF: &str = "ef";
    pub const GPU_ID: &str = "gpu_id";
    pub const INCLUDE_RAW_DATA: &str = "include_raw_data";
}

/// A scalar config value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        ConfigValue::Int(v as i64)
    }
}

impl From<usize> for ConfigValue {
    fn from(v: usize) -> Self {
        ConfigValue::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

/// Parameter mapping from name to scalar value.
///
/// # Example
///
/// ```
/// use vecindex_core::config::{keys, Config};
///
/// let conf = Config::new().with(keys::DIM, 128).with(keys::NLIST, 100);
/// assert_eq!(conf.require_usize(keys::DIM).unwrap(), 128);
/// assert_eq!(conf.get_usize(keys::NPROBE).unwrap(), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a JSON object (`{"dim": 128, "metric": "L2"}`).
    pub fn from_json(json: &str) -> IndexResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON object from a file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Non-negative integer value, if present.
    pub fn get_usize(&self, key: &str) -> IndexResult<Option<usize>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(v)) if *v >= 0 => Ok(Some(*v as usize)),
            Some(other) => Err(IndexError::config(format!(
                "'{}' must be a non-negative integer, got {:?}",
                key, other
            ))),
        }
    }

    /// Non-negative integer value; absent is an error.
    pub fn require_usize(&self, key: &str) -> IndexResult<usize> {
        self.get_usize(key)?
            .ok_or_else(|| IndexError::config(format!("missing required parameter '{}'", key)))
    }

    /// Signed integer value, if present.
    pub fn get_i64(&self, key: &str) -> IndexResult<Option<i64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(IndexError::config(format!(
                "'{}' must be an integer, got {:?}",
                key, other
            ))),
        }
    }

    /// Floating point value (integers are widened), if present.
    pub fn get_f32(&self, key: &str) -> IndexResult<Option<f32>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Float(v)) => Ok(Some(*v as f32)),
            Some(ConfigValue::Int(v)) => Ok(Some(*v as f32)),
            Some(other) => Err(IndexError::config(format!(
                "'{}' must be a number, got {:?}",
                key, other
            ))),
        }
    }

    pub fn get_str(&self, key: &str) -> IndexResult<Option<&str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(IndexError::config(format!(
                "'{}' must be a string, got {:?}",
                key, other
            ))),
        }
    }

    pub fn get_bool(&self, key: &str) -> IndexResult<Option<bool>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(v)) => Ok(Some(*v)),
            Some(other) => Err(IndexError::config(format!(
                "'{}' must be a boolean, got {:?}",
                key, other
            ))),
        }
    }

    /// Metric, defaulting to L2.
    pub fn metric(&self) -> IndexResult<Metric> {
        match self.get_str(keys::METRIC)? {
            Some(s) => Metric::parse(s),
            None => Ok(Metric::default()),
        }
    }

    /// Requested result width (`k`, or `topK`).
    pub fn top_k(&self) -> IndexResult<usize> {
        let k = match self.get_usize(keys::TOPK)? {
            Some(k) => k,
            None => self.require_usize(keys::TOPK_ALIAS).map_err(|_| {
                IndexError::config(format!("missing required parameter '{}'", keys::TOPK))
            })?,
        };
        if k == 0 {
            return Err(IndexError::config("k must be > 0"));
        }
        Ok(k)
    }
}
