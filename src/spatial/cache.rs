//! Bounded LRU cache for spatial query results.

use indexmap::IndexMap;

use crate::graph::{NodeId, Point};

use super::bounds::Bounds;

/// Hashable query fingerprint (floats compared by bit pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum QueryKey {
    Nearest([u64; 3], u64),
    Region([u64; 6]),
    Radius([u64; 3], u64),
}

fn point_bits(p: Point) -> [u64; 3] {
    [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]
}

impl QueryKey {
    pub(crate) fn nearest(point: Point, max_distance: f64) -> Self {
        QueryKey::Nearest(point_bits(point), max_distance.to_bits())
    }

    pub(crate) fn region(bounds: &Bounds) -> Self {
        let [a, b, c] = point_bits(bounds.min);
        let [d, e, f] = point_bits(bounds.max);
        QueryKey::Region([a, b, c, d, e, f])
    }

    pub(crate) fn radius(point: Point, distance: f64) -> Self {
        QueryKey::Radius(point_bits(point), distance.to_bits())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CachedResult {
    Nearest(Option<NodeId>),
    Nodes(Vec<NodeId>),
}

/// Least-recently-used cache; the front of the map is the eviction end.
#[derive(Debug)]
pub(crate) struct QueryCache {
    entries: IndexMap<QueryKey, CachedResult>,
    capacity: usize,
    pub(crate) hits: u64,
    pub(crate) misses: u64,
}

impl QueryCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(1024)),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub(crate) fn get(&mut self, key: &QueryKey) -> Option<CachedResult> {
        match self.entries.get_index_of(key) {
            Some(index) => {
                self.hits += 1;
                let last = self.entries.len() - 1;
                self.entries.move_index(index, last);
                self.entries.get(key).cloned()
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub(crate) fn insert(&mut self, key: QueryKey, value: CachedResult) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&key);
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop cached results and counters.
    pub(crate) fn reset(&mut self, capacity: usize) {
        self.entries.clear();
        self.capacity = capacity;
        self.hits = 0;
        self.misses = 0;
    }
}
