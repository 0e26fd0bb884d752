//! Append-only row storage over shared tensor chunks.
//!
//! Each `add` keeps the caller's tensor as one chunk (a reference count bump,
//! no copy). Rows are addressed by insertion offset across chunks.

use std::sync::Arc;

use vecindex_core::{IndexError, IndexResult};

#[derive(Clone, Debug)]
pub struct VectorStore {
    dim: usize,
    chunks: Vec<Arc<[f32]>>,
    /// First row offset of each chunk.
    starts: Vec<usize>,
    rows: usize,
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            chunks: Vec::new(),
            starts: Vec::new(),
            rows: 0,
        }
    }

    /// Store backed by a single tensor, e.g. a re-attached raw-data blob.
    pub fn from_tensor(dim: usize, tensor: Arc<[f32]>) -> IndexResult<Self> {
        let mut store = Self::new(dim);
        store.append(tensor)?;
        Ok(store)
    }

    /// Append a row-major chunk.
    pub fn append(&mut self, tensor: Arc<[f32]>) -> IndexResult<()> {
        if self.dim == 0 {
            return Err(IndexError::config("vector store dimensionality must be > 0"));
        }
        if tensor.len() % self.dim != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: tensor.len() % self.dim,
            });
        }
        let rows = tensor.len() / self.dim;
        if rows == 0 {
            return Ok(());
        }
        self.starts.push(self.rows);
        self.chunks.push(tensor);
        self.rows += rows;
        Ok(())
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Row at insertion offset `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let c = match self.chunks.len() {
            1 => 0,
            _ => self.starts.partition_point(|&s| s <= i) - 1,
        };
        let local = i - self.starts[c];
        &self.chunks[c][local * self.dim..(local + 1) * self.dim]
    }

    /// `(offset, row)` pairs in insertion order.
    pub fn iter_rows(&self) -> impl Iterator<Item = (usize, &[f32])> + '_ {
        self.chunks
            .iter()
            .zip(&self.starts)
            .flat_map(move |(chunk, &start)| {
                chunk
                    .chunks_exact(self.dim)
                    .enumerate()
                    .map(move |(i, row)| (start + i, row))
            })
    }

    /// All rows as one tensor. Shares the chunk when there is only one.
    pub fn to_contiguous(&self) -> Arc<[f32]> {
        match self.chunks.as_slice() {
            [single] => Arc::clone(single),
            chunks => chunks.iter().flat_map(|c| c.iter().copied()).collect(),
        }
    }

    /// True when the contiguous view is a caller tensor rather than a copy.
    pub fn is_single_chunk(&self) -> bool {
        self.chunks.len() == 1
    }

    pub fn size_bytes(&self) -> usize {
        self.rows * self.dim * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_across_chunks() {
        let mut store = VectorStore::new(2);
        store.append(vec![0.0f32, 0.1, 1.0, 1.1].into()).unwrap();
        store.append(vec![2.0f32, 2.1].into()).unwrap();
        store.append(vec![3.0f32, 3.1, 4.0, 4.1].into()).unwrap();
        assert_eq!(store.rows(), 5);
        for i in 0..5 {
            assert_eq!(store.row(i)[0], i as f32);
        }
        let offsets: Vec<usize> = store.iter_rows().map(|(i, _)| i).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
        assert_eq!(store.to_contiguous().len(), 10);
    }

    #[test]
    fn test_append_is_zero_copy() {
        let tensor: Arc<[f32]> = vec![1.0f32; 8].into();
        let store = VectorStore::from_tensor(4, Arc::clone(&tensor)).unwrap();
        assert!(store.is_single_chunk());
        assert!(Arc::ptr_eq(&store.to_contiguous(), &tensor));
    }

    #[test]
    fn test_append_rejects_ragged() {
        let mut store = VectorStore::new(3);
        assert!(matches!(
            store.append(vec![0.0f32; 4].into()),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }
}
