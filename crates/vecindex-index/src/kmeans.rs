//! K-means coarse quantizer for the inverted-file backends.
//!
//! # Algorithm
//!
//! 1. Sample at most `256 * nlist` training rows (seeded)
//! 2. Pick `nlist` distinct sample rows as initial centroids
//! 3. Assign every sample to its nearest centroid (parallel)
//! 4. Recompute centroids as member means; re-seed empty clusters from a
//!    random sample row
//! 5. Repeat `niter` times
//!
//! Training is deterministic for a given seed.

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vecindex_core::{IndexError, IndexResult, Metric};

use crate::params::MAX_POINTS_PER_CENTROID;
use crate::topk::TopK;

/// Trained centroids, row-major `nlist x dim`.
///
/// Deserialization goes through [`Centroids::from_parts`], so a decoded table
/// always has a nonzero `dim` and whole rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CentroidsRepr")]
pub struct Centroids {
    dim: usize,
    data: Vec<f32>,
}

/// Unchecked wire form of [`Centroids`].
#[derive(Deserialize)]
struct CentroidsRepr {
    dim: usize,
    data: Vec<f32>,
}

impl TryFrom<CentroidsRepr> for Centroids {
    type Error = IndexError;

    fn try_from(repr: CentroidsRepr) -> IndexResult<Self> {
        Self::from_parts(repr.dim, repr.data)
    }
}

impl Centroids {
    pub fn from_parts(dim: usize, data: Vec<f32>) -> IndexResult<Self> {
        if dim == 0 || data.is_empty() || data.len() % dim != 0 {
            return Err(IndexError::corrupt(format!(
                "centroid table of {} floats does not hold rows of {}",
                data.len(),
                dim
            )));
        }
        Ok(Self { dim, data })
    }

    #[inline]
    pub fn nlist(&self) -> usize {
        self.data.len() / self.dim
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn centroid(&self, c: usize) -> &[f32] {
        &self.data[c * self.dim..(c + 1) * self.dim]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Closest bucket for `v`.
    pub fn nearest(&self, v: &[f32], metric: Metric) -> usize {
        let mut best = 0;
        let mut best_d = metric.worst();
        for (c, centroid) in self.data.chunks_exact(self.dim).enumerate() {
            let d = metric.distance(v, centroid);
            if metric.is_better(d, best_d) {
                best = c;
                best_d = d;
            }
        }
        best
    }

    /// The `nprobe` closest buckets for `v`, closest first.
    pub fn probe(&self, v: &[f32], nprobe: usize, metric: Metric) -> Vec<usize> {
        let mut top = TopK::new(nprobe.min(self.nlist()), metric);
        for (c, centroid) in self.data.chunks_exact(self.dim).enumerate() {
            top.push(c, metric.distance(v, centroid));
        }
        top.into_sorted().into_iter().map(|n| n.offset).collect()
    }
}

/// Train `nlist` centroids over the row-major `data`.
///
/// # Errors
///
/// `InvalidConfig` when there are fewer rows than buckets.
pub fn train(
    data: &[f32],
    dim: usize,
    nlist: usize,
    niter: usize,
    seed: u64,
    metric: Metric,
) -> IndexResult<Centroids> {
    let rows = data.len() / dim;
    if rows < nlist {
        return Err(IndexError::config(format!(
            "nlist ({}) must be <= number of training rows ({})",
            nlist, rows
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let cap = nlist.saturating_mul(MAX_POINTS_PER_CENTROID);
    let sample_rows: Vec<usize> = if rows > cap {
        let mut picked = sample(&mut rng, rows, cap).into_vec();
        picked.sort_unstable();
        picked
    } else {
        (0..rows).collect()
    };
    let points: Vec<f32> = sample_rows
        .iter()
        .flat_map(|&r| data[r * dim..(r + 1) * dim].iter().copied())
        .collect();
    let n = sample_rows.len();

    let mut centroids: Vec<f32> = sample(&mut rng, n, nlist)
        .into_iter()
        .flat_map(|i| points[i * dim..(i + 1) * dim].iter().copied())
        .collect();

    debug!(rows, sampled = n, nlist, niter, "Training k-means");

    for iter in 0..niter {
        let current = Centroids {
            dim,
            data: centroids,
        };
        let assignments: Vec<usize> = points
            .par_chunks(dim)
            .map(|p| current.nearest(p, metric))
            .collect();

        let mut sums = vec![0.0f32; nlist * dim];
        let mut counts = vec![0usize; nlist];
        for (p, &c) in points.chunks_exact(dim).zip(&assignments) {
            counts[c] += 1;
            for (s, x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(p) {
                *s += x;
            }
        }

        let mut empty = 0;
        for c in 0..nlist {
            let slot = &mut sums[c * dim..(c + 1) * dim];
            if counts[c] == 0 {
                empty += 1;
                let r = rng.gen_range(0..n);
                slot.copy_from_slice(&points[r * dim..(r + 1) * dim]);
            } else {
                let inv = 1.0 / counts[c] as f32;
                slot.iter_mut().for_each(|s| *s *= inv);
            }
        }
        if empty > 0 {
            debug!(iter, empty, "Re-seeded empty clusters");
        }
        centroids = sums;
    }

    Ok(Centroids {
        dim,
        data: centroids,
    })
}
