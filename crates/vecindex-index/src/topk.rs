//! Bounded best-k collector.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use vecindex_core::Metric;

/// One candidate: a row offset and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub offset: usize,
    pub distance: f32,
}

/// Heap entry ordered so the worst kept candidate sits on top.
#[derive(Debug, Clone, Copy)]
struct Entry {
    key: f32,
    neighbor: Neighbor,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then_with(|| self.neighbor.offset.cmp(&other.neighbor.offset))
    }
}

/// Keeps the `k` best candidates under a metric.
///
/// Ties are broken by row offset so results are deterministic.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    metric: Metric,
    heap: BinaryHeap<Entry>,
}

impl TopK {
    pub fn new(k: usize, metric: Metric) -> Self {
        Self {
            k,
            metric,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    fn key(&self, distance: f32) -> f32 {
        match self.metric {
            Metric::L2 => distance,
            Metric::InnerProduct => -distance,
        }
    }

    /// Offer a candidate; kept only if it beats the current worst.
    #[inline]
    pub fn push(&mut self, offset: usize, distance: f32) {
        if self.k == 0 {
            return;
        }
        let entry = Entry {
            key: self.key(distance),
            neighbor: Neighbor { offset, distance },
        };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(mut top) = self.heap.peek_mut() {
            if entry < *top {
                *top = entry;
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Kept candidates, best first.
    pub fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| e.neighbor)
            .collect()
    }
}
