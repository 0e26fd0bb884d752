//! Error types for index lifecycle, device resource and serialization operations.
//!
//! Every failure the runtime can report is a variant of [`IndexError`]. Errors
//! are surfaced to the caller and never retried internally: the caller fixes
//! the precondition (e.g. trains before adding) and tries again.

use thiserror::Error;

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Error taxonomy for the index runtime.
#[derive(Error, Debug)]
pub enum IndexError {
    // ========== Configuration Errors ==========
    /// Missing, mistyped or out-of-range parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Vector dimensionality disagrees with the index or its config.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // ========== Lifecycle Errors ==========
    /// Add attempted before a successful Train.
    #[error("Index not trained - must call train() before add()")]
    IndexNotTrained,

    /// The backend has no native structure to operate on.
    #[error("Backend not initialized: {0}")]
    BackendNotInitialized(String),

    /// Serialize (or clone) attempted before any vectors were added.
    #[error("Index not built - train and add vectors (or load) first")]
    IndexNotBuilt,

    /// Query attempted on an index that is not queryable yet.
    #[error("Index not ready for queries - build or load it first")]
    IndexNotReady,

    /// Metadata requested from an index with no contents.
    #[error("Index is empty")]
    IndexEmpty,

    // ========== Serialization Errors ==========
    /// A binary set is missing components or holds malformed bytes.
    #[error("Corrupt serialization: {0}")]
    CorruptSerialization(String),

    /// Encoding a component failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========== Registry Errors ==========
    /// No backend registered for the index kind.
    #[error("Unsupported index kind: {0}")]
    UnsupportedIndexKind(String),

    /// The index kind has no implementation for the requested mode.
    #[error("Unsupported mode {mode} for index kind {index_type}")]
    UnsupportedMode { index_type: String, mode: String },

    // ========== Device Errors ==========
    /// Device id is negative or was never initialized.
    #[error("Invalid device: {0}")]
    InvalidDevice(i64),

    /// A device resource was released twice or into the wrong pool.
    #[error("Device resource misuse: {0}")]
    ResourceMisuse(String),

    // ========== External Errors ==========
    /// An external search library reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Helper for config errors with formatted messages.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Helper for corrupt-serialization errors.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptSerialization(msg.into())
    }

    /// Programming errors are fatal to the calling operation and must not be
    /// retried mid-flight.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::InvalidDevice(_) | Self::ResourceMisuse(_))
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::CorruptSerialization(err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        // serde_json errors include line/column info in to_string()
        IndexError::InvalidConfig(err.to_string())
    }
}

static_assertions::assert_impl_all!(IndexError: Send, Sync, std::error::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_index_not_trained() {
        let msg = IndexError::IndexNotTrained.to_string();
        assert!(msg.contains("not trained"));
        assert!(msg.contains("train()"));
    }

    #[test]
    fn test_error_display_dimension_mismatch() {
        let err = IndexError::DimensionMismatch {
            expected: 128,
            actual: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("128"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_error_display_unsupported_mode() {
        let err = IndexError::UnsupportedMode {
            index_type: "HNSW".into(),
            mode: "GPU".into(),
        };
        assert_eq!(err.to_string(), "Unsupported mode GPU for index kind HNSW");
    }

    #[test]
    fn test_programming_errors() {
        assert!(IndexError::InvalidDevice(-1).is_programming_error());
        assert!(IndexError::ResourceMisuse("double release".into()).is_programming_error());
        assert!(!IndexError::IndexNotReady.is_programming_error());
        assert!(!IndexError::config("nlist").is_programming_error());
    }

    #[test]
    fn test_from_bincode_is_corrupt() {
        let bad: Result<u64, bincode::Error> = bincode::deserialize(&[1u8, 2]);
        let err: IndexError = bad.unwrap_err().into();
        assert!(matches!(err, IndexError::CorruptSerialization(_)));
    }

    #[test]
    fn test_from_serde_json_is_invalid_config() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: IndexError = bad.unwrap_err().into();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IndexError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
