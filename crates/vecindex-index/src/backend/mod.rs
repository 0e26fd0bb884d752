//! Backend contract and the shipped backends.
//!
//! # Architecture
//!
//! Every index kind is one [`AnnBackend`] implementation. Backends know
//! nothing about lifecycle states, labels or devices: they operate on row
//! offsets (insertion order) and the owning [`Index`](crate::Index) maps
//! offsets to caller ids after filtering.
//!
//! A backend is constructed empty. Its native structure appears on `train`
//! or `load`; until then `add`, `search` and `serialize` report
//! `BackendNotInitialized`.
//!
//! | Kind | Module | Native filter | Raw tensor in set |
//! |------|--------|---------------|-------------------|
//! | `FLAT` | `flat` | yes | always |
//! | `IVF_FLAT` | `ivf` | yes | only with `include_raw_data` |
//! | `IVF_SQ8` | `ivf_sq8` | yes | never needed |
//! | `HNSW` | `hnsw` | no | inside the graph blob |

mod flat;
mod hnsw;
mod ivf;
mod ivf_sq8;

pub use flat::FlatBackend;
pub use hnsw::HnswBackend;
pub use ivf::IvfFlatBackend;
pub use ivf_sq8::IvfSq8Backend;

use serde::{Deserialize, Serialize};

use vecindex_core::{
    BinarySet, BitsetView, Config, Dataset, IndexError, IndexMode, IndexResult, IndexType, Metric,
};

use crate::params::SearchParams;
use crate::topk::Neighbor;

/// Version of the `__meta` component layout.
pub const FORMAT_VERSION: u32 = 1;

/// Index-level metadata stored next to the backend components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub index_type: String,
    pub metric: Metric,
    pub dim: usize,
    pub count: usize,
    /// The raw tensor was left out and must be re-attached as `RAW_DATA`.
    pub raw_omitted: bool,
}

impl IndexMeta {
    /// Floats in the raw tensor, `count * dim`.
    ///
    /// # Errors
    ///
    /// `CorruptSerialization` for a zero `dim` or an overflowing product.
    pub fn tensor_len(&self) -> IndexResult<usize> {
        if self.dim == 0 {
            return Err(IndexError::corrupt("metadata records dim 0"));
        }
        self.count.checked_mul(self.dim).ok_or_else(|| {
            IndexError::corrupt(format!(
                "metadata row count {} times dim {} overflows",
                self.count, self.dim
            ))
        })
    }
}

/// Capability set every index kind implements.
///
/// Implementations must be `Send + Sync`: `search` takes `&self` and is
/// called from many threads at once.
pub trait AnnBackend: Send + Sync {
    /// Kind name as registered in the factory.
    fn index_type(&self) -> IndexType;

    fn metric(&self) -> Metric;

    /// Vector dimensionality; 0 before train/load.
    fn dim(&self) -> usize;

    /// Rows added so far.
    fn ntotal(&self) -> usize;

    /// Parse and validate this kind's parameters without side effects.
    fn validate_config(&self, config: &Config) -> IndexResult<()>;

    /// Build the native structure from training data.
    fn train(&mut self, data: &Dataset, config: &Config) -> IndexResult<()>;

    /// Append rows; they receive offsets `ntotal()..ntotal() + data.rows()`.
    fn add(&mut self, data: &Dataset) -> IndexResult<()>;

    /// The best `k` rows for one query, best first.
    ///
    /// With `filter`, backends that report
    /// [`supports_native_filter`](AnnBackend::supports_native_filter) never
    /// return a set offset. `scratch` is working memory owned by the caller.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &SearchParams,
        filter: Option<BitsetView<'_>>,
        scratch: &mut Vec<f32>,
    ) -> IndexResult<Vec<Neighbor>>;

    /// Whether `search` honors the exclusion filter during traversal.
    fn supports_native_filter(&self) -> bool;

    /// Append this backend's components to `set`.
    ///
    /// Returns true when the raw tensor was omitted (so `RAW_DATA` must be
    /// re-attached before load).
    fn serialize(&self, include_raw_data: bool, set: &mut BinarySet) -> IndexResult<bool>;

    /// Rebuild from components written by `serialize`.
    fn load(&mut self, set: &BinarySet, meta: &IndexMeta) -> IndexResult<()>;

    /// Estimated resident footprint.
    fn size_bytes(&self) -> usize;

    /// Copy for execution in `mode`, sharing immutable structure.
    ///
    /// # Errors
    ///
    /// `UnsupportedMode` if this kind cannot run in `mode`.
    fn clone_for_device(&self, mode: IndexMode) -> IndexResult<Box<dyn AnnBackend>>;
}

pub(crate) fn not_initialized(kind: &str) -> IndexError {
    IndexError::BackendNotInitialized(format!(
        "{} has no native index; train or load it first",
        kind
    ))
}

/// Reject training or added data whose dimensionality differs.
pub(crate) fn check_dim(expected: usize, data: &Dataset) -> IndexResult<()> {
    if data.dim() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: data.dim(),
        });
    }
    Ok(())
}

/// Decode the raw tensor for a load, checking it against the metadata.
pub(crate) fn raw_tensor(
    set: &BinarySet,
    meta: &IndexMeta,
) -> IndexResult<std::sync::Arc<[f32]>> {
    let binary = set.get(vecindex_core::RAW_DATA).ok_or_else(|| {
        IndexError::corrupt(format!(
            "{} component missing; re-attach the raw tensor before load",
            vecindex_core::RAW_DATA
        ))
    })?;
    let tensor = binary.to_tensor()?;
    let expected = meta.tensor_len()?;
    if tensor.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: tensor.len(),
        });
    }
    Ok(tensor)
}

pub(crate) fn encode<T: Serialize>(component: &str, value: &T) -> IndexResult<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| IndexError::Serialization(format!("encoding {}: {}", component, e)))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    set: &BinarySet,
    component: &str,
) -> IndexResult<T> {
    let binary = set.require(component)?;
    bincode::deserialize(binary.as_bytes())
        .map_err(|e| IndexError::corrupt(format!("decoding {}: {}", component, e)))
}
