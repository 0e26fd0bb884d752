//! Inverted file with flat (uncompressed) residency.
//!
//! Buckets hold row offsets into the shared vector store. The serialized
//! `IVF` component carries centroids and bucket membership only; the vectors
//! themselves travel as `RAW_DATA`, which is left out unless
//! `include_raw_data` is set and must then be re-attached before load.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vecindex_core::{
    index_enum, Binary, BinarySet, BitsetView, Config, Dataset, IndexError, IndexMode,
    IndexResult, IndexType, Metric, RAW_DATA,
};

use super::{check_dim, decode, encode, not_initialized, raw_tensor, AnnBackend, IndexMeta};
use crate::kmeans::{self, Centroids};
use crate::params::{IvfParams, SearchParams};
use crate::storage::VectorStore;
use crate::topk::{Neighbor, TopK};

const IVF_COMPONENT: &str = "IVF";

#[derive(Serialize)]
struct IvfBlobRef<'a> {
    nprobe: usize,
    centroids: &'a Centroids,
    lists: &'a [Vec<u64>],
}

#[derive(Deserialize)]
struct IvfBlob {
    nprobe: usize,
    centroids: Centroids,
    lists: Vec<Vec<u64>>,
}

#[derive(Debug, Clone)]
struct IvfNative {
    metric: Metric,
    nprobe: usize,
    centroids: Arc<Centroids>,
    lists: Arc<Vec<Vec<u64>>>,
    store: VectorStore,
}

#[derive(Debug, Clone, Default)]
pub struct IvfFlatBackend {
    native: Option<IvfNative>,
}

impl IvfFlatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn native(&self) -> IndexResult<&IvfNative> {
        self.native
            .as_ref()
            .ok_or_else(|| not_initialized(index_enum::IVF_FLAT))
    }
}

impl AnnBackend for IvfFlatBackend {
    fn index_type(&self) -> IndexType {
        IndexType::from(index_enum::IVF_FLAT)
    }

    fn metric(&self) -> Metric {
        self.native.as_ref().map_or(Metric::default(), |n| n.metric)
    }

    fn dim(&self) -> usize {
        self.native.as_ref().map_or(0, |n| n.store.dim())
    }

    fn ntotal(&self) -> usize {
        self.native.as_ref().map_or(0, |n| n.store.rows())
    }

    fn validate_config(&self, config: &Config) -> IndexResult<()> {
        IvfParams::from_config(config).map(|_| ())
    }

    fn train(&mut self, data: &Dataset, config: &Config) -> IndexResult<()> {
        let params = IvfParams::from_config(config)?;
        check_dim(params.dim, data)?;
        let centroids = kmeans::train(
            data.tensor(),
            params.dim,
            params.nlist,
            params.niter,
            params.seed,
            params.metric,
        )?;
        self.native = Some(IvfNative {
            metric: params.metric,
            nprobe: params.nprobe,
            lists: Arc::new(vec![Vec::new(); params.nlist]),
            centroids: Arc::new(centroids),
            store: VectorStore::new(params.dim),
        });
        Ok(())
    }

    fn add(&mut self, data: &Dataset) -> IndexResult<()> {
        let native = self
            .native
            .as_mut()
            .ok_or_else(|| not_initialized(index_enum::IVF_FLAT))?;
        check_dim(native.store.dim(), data)?;

        let centroids = &native.centroids;
        let metric = native.metric;
        let assignments: Vec<usize> = data
            .tensor()
            .par_chunks(data.dim())
            .map(|row| centroids.nearest(row, metric))
            .collect();

        let base = native.store.rows() as u64;
        let lists = Arc::make_mut(&mut native.lists);
        for (i, &bucket) in assignments.iter().enumerate() {
            lists[bucket].push(base + i as u64);
        }
        native.store.append(data.shared_tensor().clone())?;
        debug!(rows = data.rows(), ntotal = native.store.rows(), "IVF_FLAT add");
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &SearchParams,
        filter: Option<BitsetView<'_>>,
        _scratch: &mut Vec<f32>,
    ) -> IndexResult<Vec<Neighbor>> {
        let native = self.native()?;
        let nprobe = params.nprobe.unwrap_or(native.nprobe);
        let mut top = TopK::new(k, native.metric);
        for bucket in native.centroids.probe(query, nprobe, native.metric) {
            for &offset in &native.lists[bucket] {
                let offset = offset as usize;
                if filter.map_or(false, |f| f.test(offset)) {
                    continue;
                }
                top.push(offset, native.metric.distance(query, native.store.row(offset)));
            }
        }
        Ok(top.into_sorted())
    }

    fn supports_native_filter(&self) -> bool {
        true
    }

    fn serialize(&self, include_raw_data: bool, set: &mut BinarySet) -> IndexResult<bool> {
        let native = self.native()?;
        let blob = IvfBlobRef {
            nprobe: native.nprobe,
            centroids: &native.centroids,
            lists: &native.lists,
        };
        set.append(IVF_COMPONENT, Binary::owned(encode(IVF_COMPONENT, &blob)?));
        if include_raw_data {
            set.append(RAW_DATA, Binary::owned_tensor(native.store.to_contiguous()));
        }
        Ok(!include_raw_data)
    }

    fn load(&mut self, set: &BinarySet, meta: &IndexMeta) -> IndexResult<()> {
        let blob: IvfBlob = decode(set, IVF_COMPONENT)?;
        if blob.centroids.dim() != meta.dim {
            return Err(IndexError::corrupt(format!(
                "IVF centroids have dim {}, metadata says {}",
                blob.centroids.dim(),
                meta.dim
            )));
        }
        if blob.lists.len() != blob.centroids.nlist() {
            return Err(IndexError::corrupt(format!(
                "IVF has {} buckets for {} centroids",
                blob.lists.len(),
                blob.centroids.nlist()
            )));
        }
        let members: usize = blob.lists.iter().map(Vec::len).sum();
        let in_range = blob.lists.iter().flatten().all(|&o| (o as usize) < meta.count);
        if members != meta.count || !in_range {
            return Err(IndexError::corrupt(format!(
                "IVF bucket membership does not cover {} rows",
                meta.count
            )));
        }

        let tensor = raw_tensor(set, meta)?;
        self.native = Some(IvfNative {
            metric: meta.metric,
            nprobe: blob.nprobe.clamp(1, blob.centroids.nlist()),
            centroids: Arc::new(blob.centroids),
            lists: Arc::new(blob.lists),
            store: VectorStore::from_tensor(meta.dim, tensor)?,
        });
        Ok(())
    }

    fn size_bytes(&self) -> usize {
        self.native.as_ref().map_or(0, |n| {
            n.store.size_bytes()
                + n.centroids.data().len() * std::mem::size_of::<f32>()
                + n.lists.iter().map(Vec::len).sum::<usize>() * std::mem::size_of::<u64>()
        })
    }

    fn clone_for_device(&self, _mode: IndexMode) -> IndexResult<Box<dyn AnnBackend>> {
        Ok(Box::new(self.clone()))
    }
}
