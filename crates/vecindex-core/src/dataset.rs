//! Column-oriented input bag for train, add and query calls.

use std::sync::Arc;

use crate::binary::Binary;
use crate::error::{IndexError, IndexResult};

/// Row count, dimensionality, row-major `f32` tensor and optional ids.
///
/// The tensor is reference counted so an index may keep it without copying
/// (and a caller may hand the same buffer back as a borrowed raw-data blob).
#[derive(Debug, Clone)]
pub struct Dataset {
    rows: usize,
    dim: usize,
    tensor: Arc<[f32]>,
    ids: Option<Arc<[i64]>>,
}

impl Dataset {
    /// Build from a row-major tensor.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `tensor.len()` is not `rows * dim`.
    pub fn new(rows: usize, dim: usize, tensor: impl Into<Arc<[f32]>>) -> IndexResult<Self> {
        let tensor = tensor.into();
        if dim == 0 {
            return Err(IndexError::config("dataset dimension must be > 0"));
        }
        if tensor.len() != rows * dim {
            return Err(IndexError::DimensionMismatch {
                expected: rows * dim,
                actual: tensor.len(),
            });
        }
        Ok(Self {
            rows,
            dim,
            tensor,
            ids: None,
        })
    }

    /// Infer the row count from the tensor length.
    pub fn from_flat(dim: usize, tensor: impl Into<Arc<[f32]>>) -> IndexResult<Self> {
        let tensor = tensor.into();
        if dim == 0 {
            return Err(IndexError::config("dataset dimension must be > 0"));
        }
        let remainder = tensor.len() % dim;
        if remainder != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: remainder,
            });
        }
        Self::new(tensor.len() / dim, dim, tensor)
    }

    /// Attach explicit ids, one per row.
    pub fn with_ids(mut self, ids: impl Into<Arc<[i64]>>) -> IndexResult<Self> {
        let ids = ids.into();
        if ids.len() != self.rows {
            return Err(IndexError::config(format!(
                "id count ({}) doesn't match row count ({})",
                ids.len(),
                self.rows
            )));
        }
        self.ids = Some(ids);
        Ok(self)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn tensor(&self) -> &[f32] {
        &self.tensor
    }

    /// Shared handle to the tensor.
    #[inline]
    pub fn shared_tensor(&self) -> &Arc<[f32]> {
        &self.tensor
    }

    #[inline]
    pub fn ids(&self) -> Option<&[i64]> {
        self.ids.as_deref()
    }

    /// Slice of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.tensor[i * self.dim..(i + 1) * self.dim]
    }

    /// The tensor as a borrowed raw-data blob, without copying.
    pub fn raw_binary(&self) -> Binary {
        Binary::borrowed_tensor(Arc::clone(&self.tensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_length() {
        assert!(Dataset::new(2, 3, vec![0.0f32; 6]).is_ok());
        let err = Dataset::new(2, 3, vec![0.0f32; 5]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_from_flat_infers_rows() {
        let ds = Dataset::from_flat(4, vec![1.0f32; 12]).unwrap();
        assert_eq!(ds.rows(), 3);
        assert_eq!(ds.row(2).len(), 4);
        assert!(Dataset::from_flat(5, vec![1.0f32; 12]).is_err());
        assert!(Dataset::from_flat(0, vec![1.0f32; 12]).is_err());
    }

    #[test]
    fn test_ids_must_match_rows() {
        let ds = Dataset::new(2, 2, vec![0.0f32; 4]).unwrap();
        assert!(ds.clone().with_ids(vec![10i64, 11]).is_ok());
        assert!(ds.with_ids(vec![10i64]).is_err());
    }

    #[test]
    fn test_raw_binary_shares_tensor() {
        let ds = Dataset::new(1, 2, vec![3.0f32, 4.0]).unwrap();
        let raw = ds.raw_binary();
        assert!(raw.is_borrowed());
        assert!(Arc::ptr_eq(&raw.to_tensor().unwrap(), ds.shared_tensor()));
    }
}
