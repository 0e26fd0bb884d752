//! Graph index backed by usearch HNSW.
//!
//! CPU only. usearch has no exclusion-mask hook during traversal, so the
//! query executor over-fetches and filters afterwards. Vectors are stored
//! inside the serialized graph; `RAW_DATA` is never needed.
//!
//! # Per-query `ef`
//!
//! usearch searches with a beam of `max(expansion_search, count)`. A query
//! `ef` above the trained `ef_search` is applied by asking usearch for `ef`
//! results and keeping the best `k`; an `ef` at or below the trained value
//! has no effect. The index-wide setting is never changed, so searches only
//! take the read lock.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use vecindex_core::{
    index_enum, Binary, BinarySet, BitsetView, Config, Dataset, IndexError, IndexMode,
    IndexResult, IndexType, Metric,
};

use super::{check_dim, decode, encode, not_initialized, AnnBackend, IndexMeta};
use crate::params::{HnswParams, SearchParams};
use crate::topk::Neighbor;

const GRAPH_COMPONENT: &str = "HNSW";
const PARAMS_COMPONENT: &str = "HNSW_PARAMS";

/// usearch requires capacity to be reserved before adding.
const INITIAL_CAPACITY: usize = 1024;

#[derive(Debug, Serialize, Deserialize)]
struct HnswHeader {
    m: usize,
    ef_construction: usize,
    ef_search: usize,
}

fn metric_kind(metric: Metric) -> MetricKind {
    match metric {
        Metric::L2 => MetricKind::L2sq,
        Metric::InnerProduct => MetricKind::IP,
    }
}

fn new_index(params: &HnswParams) -> IndexResult<Index> {
    let options = IndexOptions {
        dimensions: params.dim,
        metric: metric_kind(params.metric),
        quantization: ScalarKind::F32,
        connectivity: params.m,
        expansion_add: params.ef_construction,
        expansion_search: params.ef_search,
        ..Default::default()
    };
    let index = Index::new(&options)
        .map_err(|e| IndexError::Backend(format!("usearch index creation failed: {}", e)))?;
    index
        .reserve(INITIAL_CAPACITY)
        .map_err(|e| IndexError::Backend(format!("usearch reserve failed: {}", e)))?;
    Ok(index)
}

struct HnswNative {
    params: HnswParams,
    index: RwLock<Index>,
}

impl HnswNative {
    fn to_buffer(&self) -> IndexResult<Vec<u8>> {
        let index = self.index.read();
        let mut buf = vec![0u8; index.serialized_length()];
        index
            .save_to_buffer(&mut buf)
            .map_err(|e| IndexError::Serialization(format!("usearch save_to_buffer failed: {}", e)))?;
        Ok(buf)
    }

    fn from_buffer(params: HnswParams, graph: &[u8]) -> IndexResult<Self> {
        let index = new_index(&params)?;
        index
            .load_from_buffer(graph)
            .map_err(|e| IndexError::corrupt(format!("usearch load_from_buffer failed: {}", e)))?;
        Ok(Self {
            params,
            index: RwLock::new(index),
        })
    }

    fn run_search(&self, index: &Index, query: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        let size = index.size();
        if size == 0 || k == 0 {
            return Ok(Vec::new());
        }
        let matches = index
            .search(query, k.min(size))
            .map_err(|e| IndexError::Backend(format!("usearch search failed: {}", e)))?;
        let metric = self.params.metric;
        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&key, &d)| Neighbor {
                offset: key as usize,
                // usearch reports 1 - dot for inner product
                distance: match metric {
                    Metric::L2 => d,
                    Metric::InnerProduct => 1.0 - d,
                },
            })
            .collect())
    }
}

#[derive(Default)]
pub struct HnswBackend {
    native: Option<HnswNative>,
}

impl HnswBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn native(&self) -> IndexResult<&HnswNative> {
        self.native
            .as_ref()
            .ok_or_else(|| not_initialized(index_enum::HNSW))
    }
}

impl AnnBackend for HnswBackend {
    fn index_type(&self) -> IndexType {
        IndexType::from(index_enum::HNSW)
    }

    fn metric(&self) -> Metric {
        self.native.as_ref().map_or(Metric::default(), |n| n.params.metric)
    }

    fn dim(&self) -> usize {
        self.native.as_ref().map_or(0, |n| n.params.dim)
    }

    fn ntotal(&self) -> usize {
        self.native.as_ref().map_or(0, |n| n.index.read().size())
    }

    fn validate_config(&self, config: &Config) -> IndexResult<()> {
        HnswParams::from_config(config).map(|_| ())
    }

    fn train(&mut self, data: &Dataset, config: &Config) -> IndexResult<()> {
        let params = HnswParams::from_config(config)?;
        check_dim(params.dim, data)?;
        let index = new_index(&params)?;
        self.native = Some(HnswNative {
            params,
            index: RwLock::new(index),
        });
        Ok(())
    }

    #[allow(clippy::readonly_write_lock)] // usearch mutates through the C++ handle
    fn add(&mut self, data: &Dataset) -> IndexResult<()> {
        let native = self
            .native
            .as_ref()
            .ok_or_else(|| not_initialized(index_enum::HNSW))?;
        check_dim(native.params.dim, data)?;

        let index = native.index.write();
        let base = index.size();
        let needed = base + data.rows();
        if needed > index.capacity() {
            let capacity = needed.next_power_of_two().max(INITIAL_CAPACITY);
            index
                .reserve(capacity)
                .map_err(|e| IndexError::Backend(format!("usearch reserve failed: {}", e)))?;
            debug!(capacity, "Grew HNSW capacity");
        }
        for (i, row) in data.tensor().chunks_exact(data.dim()).enumerate() {
            index
                .add((base + i) as u64, row)
                .map_err(|e| IndexError::Backend(format!("usearch add failed: {}", e)))?;
        }
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
        let fetch = match params.ef {
            Some(ef) if ef > native.params.ef_search => ef.max(k),
            _ => k,
        };
        let mut hits = {
            let index = native.index.read();
            native.run_search(&index, query, fetch)?
        };
        if let Some(f) = filter {
            hits.retain(|n| !f.test(n.offset));
        }
        hits.truncate(k);
        Ok(hits)
    }

    fn supports_native_filter(&self) -> bool {
        false
    }

    fn serialize(&self, _include_raw_data: bool, set: &mut BinarySet) -> IndexResult<bool> {
        let native = self.native()?;
        let header = HnswHeader {
            m: native.params.m,
            ef_construction: native.params.ef_construction,
            ef_search: native.params.ef_search,
        };
        set.append(PARAMS_COMPONENT, Binary::owned(encode(PARAMS_COMPONENT, &header)?));
        set.append(GRAPH_COMPONENT, Binary::owned(native.to_buffer()?));
        Ok(false)
    }

    fn load(&mut self, set: &BinarySet, meta: &IndexMeta) -> IndexResult<()> {
        let header: HnswHeader = decode(set, PARAMS_COMPONENT)?;
        let graph = set.require(GRAPH_COMPONENT)?;
        let params = HnswParams {
            dim: meta.dim,
            metric: meta.metric,
            m: header.m,
            ef_construction: header.ef_construction,
            ef_search: header.ef_search,
        };
        let native = HnswNative::from_buffer(params, graph.as_bytes())?;
        {
            let index = native.index.read();
            if index.dimensions() != meta.dim || index.size() != meta.count {
                return Err(IndexError::corrupt(format!(
                    "HNSW graph holds {} rows of dim {}, metadata says {} of dim {}",
                    index.size(),
                    index.dimensions(),
                    meta.count,
                    meta.dim
                )));
            }
        }
        self.native = Some(native);
        Ok(())
    }

    fn size_bytes(&self) -> usize {
        self.native
            .as_ref()
            .map_or(0, |n| n.index.read().memory_usage())
    }

    fn clone_for_device(&self, mode: IndexMode) -> IndexResult<Box<dyn AnnBackend>> {
        if mode == IndexMode::Gpu {
            return Err(IndexError::UnsupportedMode {
                index_type: index_enum::HNSW.to_string(),
                mode: mode.to_string(),
            });
        }
        let native = match &self.native {
            Some(n) => Some(HnswNative::from_buffer(n.params, &n.to_buffer()?)?),
            None => None,
        };
        Ok(Box::new(HnswBackend { native }))
    }
}

impl std::fmt::Debug for HnswBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswBackend")
            .field("params", &self.native.as_ref().map(|n| n.params))
            .field("ntotal", &self.ntotal())
            .finish()
    }
}
