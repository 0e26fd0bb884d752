//! The per-instance index lifecycle.
//!
//! # States
//!
//! ```text
//! Untrained --train--> Trained --add--> Built --add--> Built
//!     |                   |               |
//!     +-------------------+-----load------+--> Queryable
//! ```
//!
//! `Built` and `Queryable` both answer queries and serialize. `load` is
//! accepted in any state and replaces whatever the index held. There is no
//! way back to `Untrained`: re-training needs a new instance.
//!
//! # Concurrency
//!
//! `query`, `serialize`, `count` and `dim` take `&self` and may run from many
//! threads at once. `train`, `add` and `load` take `&mut self`.
//!
//! # Devices
//!
//! A GPU-mode index is bound to a [`DeviceResourceManager`] and a device id.
//! It holds no lease between calls: each operation acquires one resource for
//! its duration and the guard returns it on every exit path.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vecindex_core::{
    keys, Binary, BinarySet, Bitset, BitsetView, Config, Dataset, IndexError, IndexMode,
    IndexResult, IndexType, QueryResult,
};
use vecindex_device::{DeviceResourceManager, ResourceHandle};

use crate::backend::{decode, encode, AnnBackend, IndexMeta, FORMAT_VERSION};
use crate::executor::{Exclusion, QueryPlan};
use crate::params::SearchParams;

/// Component holding [`IndexMeta`].
pub const META_COMPONENT: &str = "__meta";
/// Component holding the row-offset to id table.
pub const LABELS_COMPONENT: &str = "__labels";

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Untrained,
    Trained,
    /// Trained and holding added rows.
    Built,
    /// Reconstructed by `load`.
    Queryable,
}

impl IndexState {
    /// Whether the index holds rows that can be queried and serialized.
    #[inline]
    pub fn is_built(&self) -> bool {
        matches!(self, IndexState::Built | IndexState::Queryable)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Untrained => "untrained",
            IndexState::Trained => "trained",
            IndexState::Built => "built",
            IndexState::Queryable => "queryable",
        };
        f.write_str(name)
    }
}

/// Device binding of a GPU-mode index.
#[derive(Clone)]
pub(crate) struct DeviceBinding {
    pub(crate) manager: Arc<DeviceResourceManager>,
    pub(crate) device_id: i64,
}

impl DeviceBinding {
    fn lease(&self) -> IndexResult<ResourceHandle> {
        self.manager.acquire_guard(self.device_id)
    }
}

/// A vector index of one kind, executing on CPU or GPU.
///
/// Created by [`IndexFactory`](crate::IndexFactory).
///
/// # Example
///
/// ```
/// use vecindex_core::{index_enum, keys, Config, Dataset, IndexMode};
/// use vecindex_index::IndexFactory;
///
/// let factory = IndexFactory::with_defaults();
/// let mut index = factory.create(index_enum::FLAT, IndexMode::Cpu).unwrap();
///
/// let data = Dataset::from_flat(2, vec![0.0f32, 0.0, 1.0, 1.0, 5.0, 5.0]).unwrap();
/// index.train(&data, &Config::new().with(keys::DIM, 2)).unwrap();
/// index.add(&data).unwrap();
/// assert_eq!(index.count(), 3);
///
/// let query = Dataset::from_flat(2, vec![0.9f32, 0.9]).unwrap();
/// let result = index.query(&query, &Config::new().with(keys::TOPK, 2), None).unwrap();
/// assert_eq!(result.row_ids(0), &[1, 0]);
/// ```
pub struct Index {
    index_type: IndexType,
    mode: IndexMode,
    state: IndexState,
    backend: Box<dyn AnnBackend>,
    /// Constructor for an empty backend of this kind; `load` builds into one.
    build: fn() -> Box<dyn AnnBackend>,
    /// Caller id of each row offset.
    labels: Arc<Vec<i64>>,
    device: Option<DeviceBinding>,
    size_override: Option<usize>,
}

impl Index {
    pub(crate) fn new(
        index_type: IndexType,
        mode: IndexMode,
        build: fn() -> Box<dyn AnnBackend>,
        device: Option<DeviceBinding>,
    ) -> Self {
        Self {
            index_type,
            mode,
            state: IndexState::Untrained,
            backend: build(),
            build,
            labels: Arc::new(Vec::new()),
            device,
            size_override: None,
        }
    }

    /// Copy bound to `mode`; used by the cloner.
    pub(crate) fn derive(
        &self,
        mode: IndexMode,
        backend: Box<dyn AnnBackend>,
        device: Option<DeviceBinding>,
    ) -> Self {
        Self {
            index_type: self.index_type.clone(),
            mode,
            state: self.state,
            backend,
            build: self.build,
            labels: Arc::clone(&self.labels),
            device,
            size_override: self.size_override,
        }
    }

    #[inline]
    pub fn index_type(&self) -> &IndexType {
        &self.index_type
    }

    #[inline]
    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    #[inline]
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Device this index leases from; `None` in CPU mode.
    pub fn device_id(&self) -> Option<i64> {
        self.device.as_ref().map(|d| d.device_id)
    }

    pub(crate) fn backend(&self) -> &dyn AnnBackend {
        self.backend.as_ref()
    }

    /// Lease a device resource for one operation (GPU mode only).
    fn lease(&self) -> IndexResult<Option<ResourceHandle>> {
        self.device.as_ref().map(DeviceBinding::lease).transpose()
    }

    /// Build the backend's native structure from `data`.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` on bad parameters, or if the index is already trained
    /// - `DimensionMismatch` if `data` disagrees with the configured `dim`
    /// - `InvalidDevice` (GPU mode) if the bound device has no pool
    ///
    /// In GPU mode a `gpu_id` in `config` rebinds the index to that device,
    /// but only once training succeeds; a failed train keeps the old binding.
    pub fn train(&mut self, data: &Dataset, config: &Config) -> IndexResult<()> {
        if self.state != IndexState::Untrained {
            return Err(IndexError::config(format!(
                "index is already {}; re-training requires a new index",
                self.state
            )));
        }
        self.backend.validate_config(config)?;

        let target = match &self.device {
            Some(device) => Some(DeviceBinding {
                manager: Arc::clone(&device.manager),
                device_id: config.get_i64(keys::GPU_ID)?.unwrap_or(device.device_id),
            }),
            None => None,
        };
        let _lease = target.as_ref().map(DeviceBinding::lease).transpose()?;

        self.backend.train(data, config)?;
        if target.is_some() {
            self.device = target;
        }
        self.state = IndexState::Trained;
        info!(
            index_type = %self.index_type,
            mode = %self.mode,
            rows = data.rows(),
            dim = data.dim(),
            "Trained index"
        );
        Ok(())
    }

    /// Append rows. Rows without explicit ids are labelled with their offset.
    ///
    /// A failed add may leave the index partially built; discard it.
    ///
    /// # Errors
    ///
    /// - `IndexNotTrained` before a successful train or load
    /// - `DimensionMismatch` if `data` has the wrong dimensionality
    pub fn add(&mut self, data: &Dataset) -> IndexResult<()> {
        if self.state == IndexState::Untrained {
            return Err(IndexError::IndexNotTrained);
        }
        let _lease = self.lease()?;

        let base = self.backend.ntotal();
        self.backend.add(data)?;

        let labels = Arc::make_mut(&mut self.labels);
        match data.ids() {
            Some(ids) => labels.extend_from_slice(ids),
            None => labels.extend((base..base + data.rows()).map(|o| o as i64)),
        }
        if self.state == IndexState::Trained {
            self.state = IndexState::Built;
        }
        debug!(
            index_type = %self.index_type,
            rows = data.rows(),
            count = self.backend.ntotal(),
            "Added rows"
        );
        Ok(())
    }

    /// Serialize into a binary set. Does not modify the index.
    ///
    /// The raw tensor is left out for kinds that can take it back from the
    /// caller, unless `include_raw_data` is set in `config`.
    ///
    /// # Errors
    ///
    /// `IndexNotBuilt` unless the index holds rows (or was loaded).
    pub fn serialize(&self, config: &Config) -> IndexResult<BinarySet> {
        if !self.state.is_built() {
            return Err(IndexError::IndexNotBuilt);
        }
        let include_raw_data = config.get_bool(keys::INCLUDE_RAW_DATA)?.unwrap_or(false);
        let _lease = self.lease()?;

        let mut set = BinarySet::new();
        let raw_omitted = self.backend.serialize(include_raw_data, &mut set)?;
        let meta = IndexMeta {
            format_version: FORMAT_VERSION,
            index_type: self.index_type.as_str().to_string(),
            metric: self.backend.metric(),
            dim: self.backend.dim(),
            count: self.backend.ntotal(),
            raw_omitted,
        };
        set.append(META_COMPONENT, Binary::owned(encode(META_COMPONENT, &meta)?));
        set.append(
            LABELS_COMPONENT,
            Binary::owned(encode(LABELS_COMPONENT, &*self.labels)?),
        );
        Ok(set)
    }

    /// Reconstruct from a binary set written by [`serialize`](Index::serialize).
    ///
    /// If the set was written without the raw tensor, append it as
    /// [`RAW_DATA`](vecindex_core::RAW_DATA) first.
    ///
    /// Works in any state. The set is restored into a fresh backend that
    /// replaces the current one only on success, so a failed load leaves the
    /// index as it was.
    ///
    /// # Errors
    ///
    /// - `CorruptSerialization` if components are missing or malformed, the
    ///   metadata records a zero or overflowing shape, or the set was written
    ///   by another index kind or format version
    /// - `DimensionMismatch` if the re-attached tensor disagrees with the
    ///   stored row count and dimensionality
    pub fn load(&mut self, set: &BinarySet) -> IndexResult<()> {
        let meta: IndexMeta = decode(set, META_COMPONENT)?;
        if meta.format_version != FORMAT_VERSION {
            return Err(IndexError::corrupt(format!(
                "unsupported format version {} (expected {})",
                meta.format_version, FORMAT_VERSION
            )));
        }
        if meta.index_type != self.index_type.as_str() {
            return Err(IndexError::corrupt(format!(
                "binary set holds a {} index, expected {}",
                meta.index_type, self.index_type
            )));
        }
        meta.tensor_len()?;
        let labels: Vec<i64> = decode(set, LABELS_COMPONENT)?;
        if labels.len() != meta.count {
            return Err(IndexError::corrupt(format!(
                "{} labels for {} rows",
                labels.len(),
                meta.count
            )));
        }

        let _lease = self.lease()?;
        let mut backend = (self.build)();
        backend.load(set, &meta)?;
        if backend.ntotal() != meta.count || backend.dim() != meta.dim {
            return Err(IndexError::corrupt(format!(
                "backend restored {} rows of dim {}, metadata says {} of dim {}",
                backend.ntotal(),
                backend.dim(),
                meta.count,
                meta.dim
            )));
        }
        let replaced = self.state;
        self.backend = backend;
        self.labels = Arc::new(labels);
        self.state = IndexState::Queryable;
        info!(
            index_type = %self.index_type,
            mode = %self.mode,
            count = meta.count,
            dim = meta.dim,
            replaced = %replaced,
            "Loaded index"
        );
        Ok(())
    }

    /// Nearest neighbors for every query row.
    ///
    /// `bitset` excludes rows by offset (a set bit means "never return this
    /// row"); it must cover at least [`count`](Index::count) rows. Rows left
    /// without enough candidates are padded with
    /// [`SENTINEL_ID`](vecindex_core::SENTINEL_ID).
    ///
    /// # Errors
    ///
    /// - `IndexNotReady` before the index is built or loaded
    /// - `InvalidConfig` if `k` is missing or above
    ///   [`MAX_TOPK`](crate::params::MAX_TOPK)
    /// - `DimensionMismatch` for wrong-width queries or a short bitset
    pub fn query(
        &self,
        queries: &Dataset,
        config: &Config,
        bitset: Option<BitsetView<'_>>,
    ) -> IndexResult<QueryResult> {
        if !self.state.is_built() {
            return Err(IndexError::IndexNotReady);
        }
        let params = SearchParams::from_config(config)?;
        let dim = self.backend.dim();
        if queries.dim() != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: queries.dim(),
            });
        }
        let count = self.backend.ntotal();
        if let Some(bits) = bitset {
            if bits.len() < count {
                return Err(IndexError::DimensionMismatch {
                    expected: count,
                    actual: bits.len(),
                });
            }
        }

        let plan = QueryPlan {
            backend: self.backend(),
            labels: &self.labels,
            params,
            exclusion: bitset.map(Exclusion::new),
        };
        match self.lease()? {
            Some(mut guard) => plan.run_device(queries, guard.resource_mut()?),
            None => plan.run_cpu(queries),
        }
    }

    /// Convenience wrapper taking an owned bitset.
    pub fn query_with_bitset(
        &self,
        queries: &Dataset,
        config: &Config,
        bitset: &Bitset,
    ) -> IndexResult<QueryResult> {
        self.query(queries, config, Some(bitset.view()))
    }

    /// Rows held; 0 until built or loaded.
    pub fn count(&self) -> usize {
        if self.state.is_built() {
            self.backend.ntotal()
        } else {
            0
        }
    }

    /// Vector dimensionality.
    ///
    /// # Errors
    ///
    /// `IndexEmpty` until built or loaded.
    pub fn dim(&self) -> IndexResult<usize> {
        if self.state.is_built() {
            Ok(self.backend.dim())
        } else {
            Err(IndexError::IndexEmpty)
        }
    }

    /// Estimated memory footprint in bytes, or the value set with
    /// [`set_index_size`](Index::set_index_size).
    pub fn size_bytes(&self) -> usize {
        self.size_override.unwrap_or_else(|| {
            self.backend.size_bytes() + self.labels.len() * std::mem::size_of::<i64>()
        })
    }

    /// Override the reported footprint.
    pub fn set_index_size(&mut self, bytes: usize) {
        self.size_override = Some(bytes);
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("index_type", &self.index_type)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("count", &self.count())
            .field("device_id", &self.device_id())
            .finish()
    }
}

static_assertions::assert_impl_all!(Index: Send, Sync);
