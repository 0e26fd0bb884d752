//! Exhaustive search over every stored row.

use vecindex_core::{
    index_enum, Binary, BinarySet, BitsetView, Config, Dataset, IndexMode, IndexResult, IndexType,
    Metric, RAW_DATA,
};

use super::{check_dim, not_initialized, raw_tensor, AnnBackend, IndexMeta};
use crate::params::{FlatParams, SearchParams};
use crate::storage::VectorStore;
use crate::topk::{Neighbor, TopK};

/// Rows whose distances are computed into scratch per pass.
const DISTANCE_BLOCK: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct FlatBackend {
    metric: Metric,
    store: Option<VectorStore>,
}

impl FlatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> IndexResult<&VectorStore> {
        self.store
            .as_ref()
            .ok_or_else(|| not_initialized(index_enum::FLAT))
    }
}

impl AnnBackend for FlatBackend {
    fn index_type(&self) -> IndexType {
        IndexType::from(index_enum::FLAT)
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn dim(&self) -> usize {
        self.store.as_ref().map_or(0, VectorStore::dim)
    }

    fn ntotal(&self) -> usize {
        self.store.as_ref().map_or(0, VectorStore::rows)
    }

    fn validate_config(&self, config: &Config) -> IndexResult<()> {
        FlatParams::from_config(config).map(|_| ())
    }

    fn train(&mut self, data: &Dataset, config: &Config) -> IndexResult<()> {
        let params = FlatParams::from_config(config)?;
        check_dim(params.dim, data)?;
        self.metric = params.metric;
        self.store = Some(VectorStore::new(params.dim));
        Ok(())
    }

    fn add(&mut self, data: &Dataset) -> IndexResult<()> {
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| not_initialized(index_enum::FLAT))?;
        check_dim(store.dim(), data)?;
        store.append(data.shared_tensor().clone())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _params: &SearchParams,
        filter: Option<BitsetView<'_>>,
        scratch: &mut Vec<f32>,
    ) -> IndexResult<Vec<Neighbor>> {
        let store = self.store()?;
        let mut top = TopK::new(k, self.metric);
        // A caller-sized scratch bounds the block (device temp memory).
        let block = match scratch.len() {
            0 => DISTANCE_BLOCK,
            n => n.min(DISTANCE_BLOCK),
        };
        if scratch.len() < block {
            scratch.resize(block, 0.0);
        }

        let mut start = 0;
        while start < store.rows() {
            let end = (start + block).min(store.rows());
            for (slot, offset) in scratch.iter_mut().zip(start..end) {
                *slot = self.metric.distance(query, store.row(offset));
            }
            for (i, &d) in scratch[..end - start].iter().enumerate() {
                let offset = start + i;
                if filter.map_or(false, |f| f.test(offset)) {
                    continue;
                }
                top.push(offset, d);
            }
            start = end;
        }
        Ok(top.into_sorted())
    }

    fn supports_native_filter(&self) -> bool {
        true
    }

    fn serialize(&self, _include_raw_data: bool, set: &mut BinarySet) -> IndexResult<bool> {
        let store = self.store()?;
        set.append(RAW_DATA, Binary::owned_tensor(store.to_contiguous()));
        Ok(false)
    }

    fn load(&mut self, set: &BinarySet, meta: &IndexMeta) -> IndexResult<()> {
        let tensor = raw_tensor(set, meta)?;
        self.metric = meta.metric;
        self.store = Some(VectorStore::from_tensor(meta.dim, tensor)?);
        Ok(())
    }

    fn size_bytes(&self) -> usize {
        self.store.as_ref().map_or(0, VectorStore::size_bytes)
    }

    fn clone_for_device(&self, _mode: IndexMode) -> IndexResult<Box<dyn AnnBackend>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecindex_core::{keys, Bitset, IndexError};

    fn trained(rows: &[f32], dim: usize) -> FlatBackend {
        let ds = Dataset::from_flat(dim, rows.to_vec()).unwrap();
        let mut b = FlatBackend::new();
        b.train(&ds, &Config::new().with(keys::DIM, dim)).unwrap();
        b.add(&ds).unwrap();
        b
    }

    #[test]
    fn test_placeholder_reports_not_initialized() {
        let mut b = FlatBackend::new();
        let ds = Dataset::from_flat(2, vec![0.0f32; 4]).unwrap();
        assert!(matches!(b.add(&ds), Err(IndexError::BackendNotInitialized(_))));
        let mut scratch = Vec::new();
        assert!(matches!(
            b.search(&[0.0, 0.0], 1, &SearchParams::new(1), None, &mut scratch),
            Err(IndexError::BackendNotInitialized(_))
        ));
        assert!(matches!(
            b.serialize(false, &mut BinarySet::new()),
            Err(IndexError::BackendNotInitialized(_))
        ));
    }

    #[test]
    fn test_exact_search_with_filter() {
        let b = trained(&[0.0, 1.0, 2.0, 3.0], 1);
        let mut scratch = Vec::new();
        let hits = b
            .search(&[0.9], 2, &SearchParams::new(2), None, &mut scratch)
            .unwrap();
        assert_eq!(hits.iter().map(|n| n.offset).collect::<Vec<_>>(), vec![1, 0]);

        let mut bits = Bitset::new(4);
        bits.set(1);
        let hits = b
            .search(&[0.9], 2, &SearchParams::new(2), Some(bits.view()), &mut scratch)
            .unwrap();
        assert_eq!(hits.iter().map(|n| n.offset).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_train_dim_mismatch() {
        let ds = Dataset::from_flat(3, vec![0.0f32; 6]).unwrap();
        let mut b = FlatBackend::new();
        let err = b.train(&ds, &Config::new().with(keys::DIM, 4)).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 4, actual: 3 }
        ));
    }
}
