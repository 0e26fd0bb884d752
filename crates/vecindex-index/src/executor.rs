//! Filtered query execution.
//!
//! Turns backend hits (row offsets) into a fixed-width [`QueryResult`]:
//! excluded rows never appear, missing slots are padded with the sentinel,
//! and offsets are mapped to caller ids.
//!
//! Backends without native filtering are over-fetched: ask for
//! `k + excluded` candidates, drop excluded rows, and double the request
//! until `k` survive or the whole index has been asked for.
//!
//! CPU queries fan out across the rayon pool. Device queries are staged in
//! batches through the leased resource's pinned buffer and ranked with its
//! scratch memory.

use rayon::prelude::*;
use tracing::debug;

use vecindex_core::{BitsetView, Dataset, IndexError, IndexResult, QueryResult, SENTINEL_ID};
use vecindex_device::DeviceResource;

use crate::backend::AnnBackend;
use crate::params::SearchParams;
use crate::topk::Neighbor;

/// Upper bound on distance scratch per query, in floats.
const MAX_SCRATCH: usize = 1024;

/// An exclusion mask with its population counted once per query call.
#[derive(Clone, Copy)]
pub(crate) struct Exclusion<'a> {
    view: BitsetView<'a>,
    excluded: usize,
}

impl<'a> Exclusion<'a> {
    pub(crate) fn new(view: BitsetView<'a>) -> Self {
        Self {
            view,
            excluded: view.count_ones(),
        }
    }
}

pub(crate) struct QueryPlan<'a> {
    pub backend: &'a dyn AnnBackend,
    pub labels: &'a [i64],
    pub params: SearchParams,
    pub exclusion: Option<Exclusion<'a>>,
}

impl QueryPlan<'_> {
    /// Hits for one query with the exclusion applied, at most `k`.
    fn search_one(&self, query: &[f32], scratch: &mut Vec<f32>) -> IndexResult<Vec<Neighbor>> {
        let k = self.params.k;
        let backend = self.backend;
        let Some(exclusion) = self.exclusion.filter(|e| e.excluded > 0) else {
            return backend.search(query, k, &self.params, None, scratch);
        };
        if backend.supports_native_filter() {
            return backend.search(query, k, &self.params, Some(exclusion.view), scratch);
        }

        let ntotal = backend.ntotal();
        let mut fetch = (k + exclusion.excluded).min(ntotal);
        loop {
            let hits = backend.search(query, fetch, &self.params, None, scratch)?;
            let exhausted = fetch >= ntotal || hits.len() < fetch;
            let kept: Vec<Neighbor> = hits
                .into_iter()
                .filter(|n| !exclusion.view.test(n.offset))
                .take(k)
                .collect();
            if kept.len() >= k || exhausted {
                return Ok(kept);
            }
            debug!(fetch, kept = kept.len(), k, "Over-fetch short after filtering, widening");
            fetch = (fetch * 2).min(ntotal);
        }
    }

    fn fill(&self, hits: &[Neighbor], ids: &mut [i64], distances: &mut [f32]) {
        for ((id, dist), hit) in ids.iter_mut().zip(distances.iter_mut()).zip(hits) {
            *id = self.labels.get(hit.offset).copied().unwrap_or(SENTINEL_ID);
            *dist = hit.distance;
        }
    }

    fn padded(&self, nq: usize) -> IndexResult<(Vec<i64>, Vec<f32>)> {
        let slots = nq.checked_mul(self.params.k).ok_or_else(|| {
            IndexError::config(format!(
                "{} queries of width {} overflow the result buffer",
                nq, self.params.k
            ))
        })?;
        Ok((
            vec![SENTINEL_ID; slots],
            vec![self.backend.metric().worst(); slots],
        ))
    }

    /// Run every query on the rayon pool.
    pub fn run_cpu(&self, queries: &Dataset) -> IndexResult<QueryResult> {
        let nq = queries.rows();
        let k = self.params.k;
        let (mut ids, mut distances) = self.padded(nq)?;

        ids.par_chunks_mut(k)
            .zip(distances.par_chunks_mut(k))
            .enumerate()
            .try_for_each_init(Vec::new, |scratch, (q, (id_row, dist_row))| {
                let hits = self.search_one(queries.row(q), scratch)?;
                self.fill(&hits, id_row, dist_row);
                Ok::<(), IndexError>(())
            })?;

        Ok(QueryResult::from_parts(nq, k, ids, distances))
    }

    /// Run queries in batches staged through a leased device resource.
    pub fn run_device(
        &self,
        queries: &Dataset,
        resource: &mut DeviceResource,
    ) -> IndexResult<QueryResult> {
        let nq = queries.rows();
        let k = self.params.k;
        let dim = queries.dim();
        let (mut ids, mut distances) = self.padded(nq)?;

        let batch_rows = resource.staging_rows(dim);
        let scratch_len = (resource.temp_mem_bytes() / std::mem::size_of::<f32>())
            .clamp(1, MAX_SCRATCH);
        debug!(
            device_id = resource.device_id(),
            nq, batch_rows, "Staging device query"
        );

        for (b, batch) in queries.tensor().chunks(batch_rows * dim).enumerate() {
            let (staged, scratch) = resource.stage(batch, scratch_len);
            for (i, query) in staged.chunks_exact(dim).enumerate() {
                let q = b * batch_rows + i;
                let hits = self.search_one(query, scratch)?;
                self.fill(
                    &hits,
                    &mut ids[q * k..(q + 1) * k],
                    &mut distances[q * k..(q + 1) * k],
                );
            }
        }

        Ok(QueryResult::from_parts(nq, k, ids, distances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FlatBackend, HnswBackend};
    use vecindex_core::{keys, Bitset, Config};

    fn flat(rows: usize) -> (FlatBackend, Vec<i64>) {
        let data: Vec<f32> = (0..rows).map(|i| i as f32).collect();
        let ds = Dataset::from_flat(1, data).unwrap();
        let mut b = FlatBackend::new();
        b.train(&ds, &Config::new().with(keys::DIM, 1)).unwrap();
        b.add(&ds).unwrap();
        (b, (0..rows as i64).map(|i| i + 100).collect())
    }

    #[test]
    fn test_pads_when_too_few_rows_remain() {
        let (b, labels) = flat(4);
        let mut bits = Bitset::new(4);
        bits.set(0);
        bits.set(1);
        let plan = QueryPlan {
            backend: &b,
            labels: &labels,
            params: SearchParams::new(3),
            exclusion: Some(Exclusion::new(bits.view())),
        };
        let queries = Dataset::from_flat(1, vec![0.0f32]).unwrap();
        let r = plan.run_cpu(&queries).unwrap();
        assert_eq!(r.row_ids(0), &[102, 103, SENTINEL_ID]);
        assert_eq!(r.row_distances(0)[2], f32::MAX);
    }

    #[test]
    fn test_over_fetch_for_post_filter_backend() {
        let data: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let ds = Dataset::from_flat(1, data).unwrap();
        let mut b = HnswBackend::new();
        b.train(&ds, &Config::new().with(keys::DIM, 1)).unwrap();
        b.add(&ds).unwrap();
        let labels: Vec<i64> = (0..64).collect();

        // Exclude the 10 rows nearest to the query.
        let mut bits = Bitset::new(64);
        for i in 0..10 {
            bits.set(i);
        }
        let plan = QueryPlan {
            backend: &b,
            labels: &labels,
            params: SearchParams::new(5),
            exclusion: Some(Exclusion::new(bits.view())),
        };
        let queries = Dataset::from_flat(1, vec![0.0f32]).unwrap();
        let r = plan.run_cpu(&queries).unwrap();
        assert_eq!(r.num_valid_results(0), 5);
        assert!(r.row_ids(0).iter().all(|&id| id >= 10));
    }
}
