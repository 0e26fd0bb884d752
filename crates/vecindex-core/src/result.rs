//! Ranked neighbor arrays returned by a query.

use serde::{Deserialize, Serialize};

use crate::types::Metric;

/// Id written into result slots that have no matching row.
pub const SENTINEL_ID: i64 = -1;

/// `nq x k` ranked neighbor ids and distances, row-major.
///
/// Every row is exactly `k` wide; rows with fewer candidates than `k` are
/// padded with [`SENTINEL_ID`] and the metric's worst distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    nq: usize,
    k: usize,
    ids: Vec<i64>,
    distances: Vec<f32>,
}

impl QueryResult {
    /// All-sentinel result of shape `nq x k`.
    pub fn padded(nq: usize, k: usize, metric: Metric) -> Self {
        Self {
            nq,
            k,
            ids: vec![SENTINEL_ID; nq * k],
            distances: vec![metric.worst(); nq * k],
        }
    }

    /// Wrap precomputed arrays.
    ///
    /// # Panics
    ///
    /// Panics if either array is not `nq * k` long.
    pub fn from_parts(nq: usize, k: usize, ids: Vec<i64>, distances: Vec<f32>) -> Self {
        assert_eq!(ids.len(), nq * k, "ids must be nq * k");
        assert_eq!(distances.len(), nq * k, "distances must be nq * k");
        Self {
            nq,
            k,
            ids,
            distances,
        }
    }

    #[inline]
    pub fn nq(&self) -> usize {
        self.nq
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    #[inline]
    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    /// Ids of query `q`.
    #[inline]
    pub fn row_ids(&self, q: usize) -> &[i64] {
        &self.ids[q * self.k..(q + 1) * self.k]
    }

    /// Distances of query `q`.
    #[inline]
    pub fn row_distances(&self, q: usize) -> &[f32] {
        &self.distances[q * self.k..(q + 1) * self.k]
    }

    /// Mutable slots of query `q`.
    pub fn row_mut(&mut self, q: usize) -> (&mut [i64], &mut [f32]) {
        let range = q * self.k..(q + 1) * self.k;
        (&mut self.ids[range.clone()], &mut self.distances[range])
    }

    /// `(id, distance)` pairs of query `q` in rank order, sentinel slots
    /// skipped.
    ///
    /// # Panics
    ///
    /// Panics if `q >= nq`.
    ///
    /// # Example
    ///
    /// ```
    /// use vecindex_core::QueryResult;
    ///
    /// let result = QueryResult::from_parts(
    ///     2,
    ///     3,
    ///     vec![1, 2, -1, 4, 5, 6],
    ///     vec![0.1, 0.2, f32::MAX, 0.4, 0.5, 0.6],
    /// );
    /// let q0: Vec<_> = result.query_results(0).collect();
    /// assert_eq!(q0, vec![(1, 0.1), (2, 0.2)]);
    /// assert_eq!(result.num_valid_results(1), 3);
    /// ```
    pub fn query_results(&self, q: usize) -> impl Iterator<Item = (i64, f32)> + '_ {
        assert!(q < self.nq, "query index ({}) >= nq ({})", q, self.nq);
        self.row_ids(q)
            .iter()
            .zip(self.row_distances(q))
            .filter(|(&id, _)| id != SENTINEL_ID)
            .map(|(&id, &distance)| (id, distance))
    }

    #[inline]
    pub fn query_results_vec(&self, q: usize) -> Vec<(i64, f32)> {
        self.query_results(q).collect()
    }

    /// Number of non-sentinel entries in query `q`.
    #[inline]
    pub fn num_valid_results(&self, q: usize) -> usize {
        self.query_results(q).count()
    }

    #[inline]
    pub fn has_results(&self, q: usize) -> bool {
        self.query_results(q).next().is_some()
    }

    /// Best match of query `q`.
    #[inline]
    pub fn top_result(&self, q: usize) -> Option<(i64, f32)> {
        self.query_results(q).next()
    }

    /// `(query, id, distance)` for every non-sentinel slot.
    pub fn all_results(&self) -> impl Iterator<Item = (usize, i64, f32)> + '_ {
        (0..self.nq).flat_map(move |q| self.query_results(q).map(move |(id, d)| (q, id, d)))
    }
}
