//! Shared types for the vecindex runtime.
//!
//! # Architecture
//!
//! - **error**: `IndexError` taxonomy and `IndexResult`
//! - **types**: `IndexType`, `IndexMode`, `Metric`
//! - **config**: string-keyed parameter bag with typed getters
//! - **dataset**: row-major tensor + optional ids used by train/add/query
//! - **binary**: `Binary` / `BinarySet` serialization components
//! - **envelope**: persisted byte form of a `BinarySet`
//! - **bitset**: per-row exclusion mask for filtered queries
//! - **result**: fixed-width ranked query results
//!
//! # Example
//!
//! ```
//! use vecindex_core::{Binary, BinarySet, Dataset, RAW_DATA};
//!
//! let ds = Dataset::from_flat(2, vec![0.0f32, 1.0, 2.0, 3.0]).unwrap();
//! let mut set = BinarySet::new();
//! set.append(RAW_DATA, ds.raw_binary());
//! set.append("__meta", Binary::owned(vec![1]));
//!
//! let bytes = set.to_bytes().unwrap();
//! let back = BinarySet::from_bytes(&bytes).unwrap();
//! assert_eq!(back.len(), 2);
//! ```

pub mod binary;
pub mod bitset;
pub mod config;
pub mod dataset;
pub mod envelope;
pub mod error;
pub mod result;
pub mod types;

pub use binary::{Binary, BinarySet, Ownership, RAW_DATA};
pub use bitset::{Bitset, BitsetView};
pub use config::{keys, Config, ConfigValue};
pub use dataset::Dataset;
pub use envelope::ENVELOPE_VERSION;
pub use error::{IndexError, IndexResult};
pub use result::{QueryResult, SENTINEL_ID};
pub use types::{index_enum, IndexMode, IndexType, Metric};
