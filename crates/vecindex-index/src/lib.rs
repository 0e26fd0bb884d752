//! Index lifecycle, backends and query execution for the vecindex runtime.
//!
//! # Architecture
//!
//! - **backend**: the `AnnBackend` contract and the FLAT, IVF_FLAT, IVF_SQ8
//!   and HNSW implementations
//! - **index**: the `Index` state machine (train, add, serialize, load, query)
//! - **factory**: `IndexFactory`, kind name + mode to a fresh `Index`
//! - **cloner**: CPU/GPU migration of built indexes
//! - **params**: typed per-kind parameters parsed from a `Config`
//! - **kmeans**, **storage**, **topk**: shared building blocks for backends
//!
//! # Example
//!
//! ```
//! use vecindex_core::{index_enum, keys, Bitset, Config, Dataset, IndexMode, SENTINEL_ID};
//! use vecindex_index::IndexFactory;
//!
//! let factory = IndexFactory::with_defaults();
//! let mut index = factory.create(index_enum::FLAT, IndexMode::Cpu).unwrap();
//!
//! let data = Dataset::from_flat(1, vec![0.0f32, 1.0, 2.0]).unwrap();
//! index.train(&data, &Config::new().with(keys::DIM, 1)).unwrap();
//! index.add(&data).unwrap();
//!
//! let mut bits = Bitset::new(3);
//! bits.set(0);
//! let query = Dataset::from_flat(1, vec![0.0f32]).unwrap();
//! let conf = Config::new().with(keys::TOPK, 3);
//! let result = index.query(&query, &conf, Some(bits.view())).unwrap();
//! assert_eq!(result.row_ids(0), &[1, 2, SENTINEL_ID]);
//! ```

pub mod backend;
pub mod cloner;
mod executor;
pub mod factory;
pub mod index;
pub mod kmeans;
pub mod params;
pub mod storage;
pub mod topk;

pub use backend::{AnnBackend, IndexMeta, FORMAT_VERSION};
pub use cloner::{copy_cpu_to_gpu, copy_gpu_to_cpu};
pub use factory::{BackendEntry, IndexFactory, DEFAULT_BACKENDS, DEFAULT_DEVICE_ID};
pub use index::{Index, IndexState, LABELS_COMPONENT, META_COMPONENT};
pub use params::{FlatParams, HnswParams, IvfParams, SearchParams, MAX_TOPK};
