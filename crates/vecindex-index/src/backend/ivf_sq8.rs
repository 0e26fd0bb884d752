//! Inverted file over 8-bit scalar-quantized codes.
//!
//! Each dimension is mapped linearly onto `0..=255` using the per-dimension
//! range seen during training. Codes are self-contained, so the serialized
//! set never needs `RAW_DATA`.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vecindex_core::{
    index_enum, Binary, BinarySet, BitsetView, Config, Dataset, IndexError, IndexMode,
    IndexResult, IndexType, Metric,
};

use super::{check_dim, decode, encode, not_initialized, AnnBackend, IndexMeta};
use crate::kmeans::{self, Centroids};
use crate::params::{IvfParams, SearchParams};
use crate::topk::{Neighbor, TopK};

const SQ8_COMPONENT: &str = "IVF_SQ8";

/// Per-dimension linear 8-bit quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScalarQuantizer {
    vmin: Vec<f32>,
    vdiff: Vec<f32>,
}

impl ScalarQuantizer {
    fn train(data: &[f32], dim: usize) -> Self {
        let mut vmin = vec![f32::MAX; dim];
        let mut vmax = vec![f32::MIN; dim];
        for row in data.chunks_exact(dim) {
            for d in 0..dim {
                vmin[d] = vmin[d].min(row[d]);
                vmax[d] = vmax[d].max(row[d]);
            }
        }
        let vdiff = vmin.iter().zip(&vmax).map(|(lo, hi)| hi - lo).collect();
        Self { vmin, vdiff }
    }

    #[inline]
    fn dim(&self) -> usize {
        self.vmin.len()
    }

    fn encode_into(&self, row: &[f32], out: &mut Vec<u8>) {
        for ((x, lo), diff) in row.iter().zip(&self.vmin).zip(&self.vdiff) {
            let code = if *diff > 0.0 {
                ((x - lo) / diff * 255.0).round().clamp(0.0, 255.0)
            } else {
                0.0
            };
            out.push(code as u8);
        }
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        for (((o, c), lo), diff) in out.iter_mut().zip(code).zip(&self.vmin).zip(&self.vdiff) {
            *o = lo + (*c as f32 / 255.0) * diff;
        }
    }
}

/// One bucket: row offsets and their concatenated codes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sq8List {
    offsets: Vec<u64>,
    codes: Vec<u8>,
}

#[derive(Serialize)]
struct Sq8BlobRef<'a> {
    nprobe: usize,
    centroids: &'a Centroids,
    quantizer: &'a ScalarQuantizer,
    lists: &'a [Sq8List],
}

#[derive(Deserialize)]
struct Sq8Blob {
    nprobe: usize,
    centroids: Centroids,
    quantizer: ScalarQuantizer,
    lists: Vec<Sq8List>,
}

#[derive(Debug, Clone)]
struct Sq8Native {
    metric: Metric,
    nprobe: usize,
    ntotal: usize,
    centroids: Arc<Centroids>,
    quantizer: Arc<ScalarQuantizer>,
    lists: Arc<Vec<Sq8List>>,
}

#[derive(Debug, Clone, Default)]
pub struct IvfSq8Backend {
    native: Option<Sq8Native>,
}

impl IvfSq8Backend {
    pub fn new() -> Self {
        Self::default()
    }

    fn native(&self) -> IndexResult<&Sq8Native> {
        self.native
            .as_ref()
            .ok_or_else(|| not_initialized(index_enum::IVF_SQ8))
    }
}

impl AnnBackend for IvfSq8Backend {
    fn index_type(&self) -> IndexType {
        IndexType::from(index_enum::IVF_SQ8)
    }

    fn metric(&self) -> Metric {
        self.native.as_ref().map_or(Metric::default(), |n| n.metric)
    }

    fn dim(&self) -> usize {
        self.native.as_ref().map_or(0, |n| n.quantizer.dim())
    }

    fn ntotal(&self) -> usize {
        self.native.as_ref().map_or(0, |n| n.ntotal)
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
        let quantizer = ScalarQuantizer::train(data.tensor(), params.dim);
        self.native = Some(Sq8Native {
            metric: params.metric,
            nprobe: params.nprobe,
            ntotal: 0,
            centroids: Arc::new(centroids),
            quantizer: Arc::new(quantizer),
            lists: Arc::new(vec![Sq8List::default(); params.nlist]),
        });
        Ok(())
    }

    fn add(&mut self, data: &Dataset) -> IndexResult<()> {
        let native = self
            .native
            .as_mut()
            .ok_or_else(|| not_initialized(index_enum::IVF_SQ8))?;
        check_dim(native.quantizer.dim(), data)?;

        let centroids = &native.centroids;
        let metric = native.metric;
        let assignments: Vec<usize> = data
            .tensor()
            .par_chunks(data.dim())
            .map(|row| centroids.nearest(row, metric))
            .collect();

        let base = native.ntotal as u64;
        let quantizer = Arc::clone(&native.quantizer);
        let lists = Arc::make_mut(&mut native.lists);
        for (i, (row, &bucket)) in data.tensor().chunks_exact(data.dim()).zip(&assignments).enumerate() {
            let list = &mut lists[bucket];
            list.offsets.push(base + i as u64);
            quantizer.encode_into(row, &mut list.codes);
        }
        native.ntotal += data.rows();
        debug!(rows = data.rows(), ntotal = native.ntotal, "IVF_SQ8 add");
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &SearchParams,
        filter: Option<BitsetView<'_>>,
        scratch: &mut Vec<f32>,
    ) -> IndexResult<Vec<Neighbor>> {
        let native = self.native()?;
        let dim = native.quantizer.dim();
        if scratch.len() < dim {
            scratch.resize(dim, 0.0);
        }
        let decoded = &mut scratch[..dim];

        let nprobe = params.nprobe.unwrap_or(native.nprobe);
        let mut top = TopK::new(k, native.metric);
        for bucket in native.centroids.probe(query, nprobe, native.metric) {
            let list = &native.lists[bucket];
            for (&offset, code) in list.offsets.iter().zip(list.codes.chunks_exact(dim)) {
                let offset = offset as usize;
                if filter.map_or(false, |f| f.test(offset)) {
                    continue;
                }
                native.quantizer.decode_into(code, decoded);
                top.push(offset, native.metric.distance(query, decoded));
            }
        }
        Ok(top.into_sorted())
    }

    fn supports_native_filter(&self) -> bool {
        true
    }

    fn serialize(&self, _include_raw_data: bool, set: &mut BinarySet) -> IndexResult<bool> {
        let native = self.native()?;
        let blob = Sq8BlobRef {
            nprobe: native.nprobe,
            centroids: &native.centroids,
            quantizer: &native.quantizer,
            lists: &native.lists,
        };
        set.append(SQ8_COMPONENT, Binary::owned(encode(SQ8_COMPONENT, &blob)?));
        Ok(false)
    }

    fn load(&mut self, set: &BinarySet, meta: &IndexMeta) -> IndexResult<()> {
        let blob: Sq8Blob = decode(set, SQ8_COMPONENT)?;
        let dim = blob.quantizer.dim();
        if dim != meta.dim || blob.centroids.dim() != dim || blob.quantizer.vdiff.len() != dim {
            return Err(IndexError::corrupt(format!(
                "IVF_SQ8 components disagree with metadata dim {}",
                meta.dim
            )));
        }
        if blob.lists.len() != blob.centroids.nlist() {
            return Err(IndexError::corrupt("IVF_SQ8 bucket count differs from centroids"));
        }
        let mut ntotal = 0;
        for list in &blob.lists {
            if list.codes.len() != list.offsets.len() * dim
                || list.offsets.iter().any(|&o| o as usize >= meta.count)
            {
                return Err(IndexError::corrupt("IVF_SQ8 bucket codes are malformed"));
            }
            ntotal += list.offsets.len();
        }
        if ntotal != meta.count {
            return Err(IndexError::corrupt(format!(
                "IVF_SQ8 holds {} rows, metadata says {}",
                ntotal, meta.count
            )));
        }
        self.native = Some(Sq8Native {
            metric: meta.metric,
            nprobe: blob.nprobe.clamp(1, blob.centroids.nlist()),
            ntotal,
            centroids: Arc::new(blob.centroids),
            quantizer: Arc::new(blob.quantizer),
            lists: Arc::new(blob.lists),
        });
        Ok(())
    }

    fn size_bytes(&self) -> usize {
        self.native.as_ref().map_or(0, |n| {
            let codes: usize = n
                .lists
                .iter()
                .map(|l| l.codes.len() + l.offsets.len() * std::mem::size_of::<u64>())
                .sum();
            codes + (n.centroids.data().len() + 2 * n.quantizer.dim()) * std::mem::size_of::<f32>()
        })
    }

    fn clone_for_device(&self, _mode: IndexMode) -> IndexResult<Box<dyn AnnBackend>> {
        Ok(Box::new(self.clone()))
    }
}
