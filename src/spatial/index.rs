//! Quadtree / octree spatial index over positioned nodes.
//!
//! Provides sub-linear spatial queries for:
//! - Nearest neighbor (branch-and-bound)
//! - Region membership (inclusive bounds)
//! - Point-in-radius
//! - Ray intersection (via [`RaycastingSystem`])
//!
//! The index is rebuilt wholesale whenever authoritative positions change; it
//! is never patched incrementally. Mutation (`build`, `clear`, `rebuild`) takes
//! `&mut self`, queries take `&self` and may run concurrently.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::Stopwatch;
use crate::error::{Result, Warning};
use crate::graph::{Dimensions, Node, NodeId, Point};

use super::bounds::Bounds;
use super::cache::{CachedResult, QueryCache, QueryKey};
use super::config::{RebuildStrategy, SpatialIndexConfig};
use super::raycast::{Ray, RayIntersection, RaycastingSystem};

/// A node position stored in a leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Entry {
    pub(crate) id: NodeId,
    pub(crate) point: Point,
}

#[derive(Debug)]
pub(crate) enum PartitionKind {
    Leaf(Vec<Entry>),
    Branch(Vec<Partition>),
}

/// One node of the partition tree.
#[derive(Debug)]
pub(crate) struct Partition {
    pub(crate) bounds: Bounds,
    pub(crate) kind: PartitionKind,
}

impl Partition {
    fn empty_root() -> Self {
        Self {
            bounds: Bounds::point(Point::ORIGIN),
            kind: PartitionKind::Leaf(Vec::new()),
        }
    }
}

/// Shape of the tree after the last build.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct TreeShape {
    max_depth_reached: usize,
    leaf_count: usize,
    partition_count: usize,
}

/// Index statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatistics {
    pub node_count: usize,
    pub max_depth_reached: usize,
    pub leaf_count: usize,
    pub partition_count: usize,
    /// Mean entries per leaf.
    pub average_occupancy: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cached_queries: usize,
    pub build_time_ms: f64,
    pub stale: bool,
}

/// Spatial index for positioned graph nodes.
pub struct SpatialIndex {
    config: SpatialIndexConfig,
    root: Partition,
    len: usize,
    shape: TreeShape,
    build_time_ms: f64,
    cache: Mutex<QueryCache>,
    pending: Option<Vec<(NodeId, Point)>>,
}

impl SpatialIndex {
    /// Create a new empty spatial index.
    pub fn new(config: SpatialIndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::empty(config))
    }

    fn empty(config: SpatialIndexConfig) -> Self {
        let cache = QueryCache::new(config.cache_size);
        Self {
            config,
            root: Partition::empty_root(),
            len: 0,
            shape: TreeShape {
                leaf_count: 1,
                partition_count: 1,
                ..TreeShape::default()
            },
            build_time_ms: 0.0,
            cache: Mutex::new(cache),
            pending: None,
        }
    }

    pub fn config(&self) -> &SpatialIndexConfig {
        &self.config
    }

    pub fn dimensions(&self) -> Dimensions {
        self.config.dimensions
    }

    /// Get the number of indexed nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounds of the root partition.
    pub fn bounds(&self) -> Bounds {
        self.root.bounds
    }

    pub(crate) fn root(&self) -> &Partition {
        &self.root
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Replace all entries with the positioned nodes in `nodes`.
    ///
    /// Nodes without coordinates are skipped and reported as warnings.
    pub fn build(&mut self, nodes: &[Node]) -> Vec<Warning> {
        let mut warnings = Vec::new();
        let points: Vec<(NodeId, Point)> = nodes
            .iter()
            .filter_map(|node| match node.position {
                Some(p) => Some((node.id, p)),
                None => {
                    warnings.push(Warning::input(format!(
                        "{} has no position and was not indexed",
                        node.id
                    )));
                    None
                }
            })
            .collect();
        warnings.extend(self.build_from_points(points));
        warnings
    }

    /// Replace all entries with `(id, position)` pairs.
    ///
    /// Non-finite positions are skipped and reported as warnings.
    pub fn build_from_points(
        &mut self,
        points: impl IntoIterator<Item = (NodeId, Point)>,
    ) -> Vec<Warning> {
        let watch = Stopwatch::start();
        let dimensions = self.config.dimensions;
        let mut warnings = Vec::new();

        let entries: Vec<Entry> = points
            .into_iter()
            .filter_map(|(id, point)| {
                if point.is_finite() {
                    Some(Entry {
                        id,
                        point: point.project(dimensions),
                    })
                } else {
                    warnings.push(Warning::numeric(format!(
                        "{id} has a non-finite position and was not indexed"
                    )));
                    None
                }
            })
            .collect();

        let bounds = Bounds::enclosing(entries.iter().map(|e| e.point))
            .unwrap_or_else(|| Bounds::point(Point::ORIGIN));

        self.len = entries.len();
        let mut shape = TreeShape::default();
        self.root = self.partition(bounds, 0, entries, &mut shape);
        self.shape = shape;
        self.pending = None;
        self.build_time_ms = watch.elapsed_ms();
        self.cache.lock().reset(self.config.cache_size);

        tracing::debug!(
            nodes = self.len,
            depth = shape.max_depth_reached,
            leaves = shape.leaf_count,
            elapsed_ms = self.build_time_ms,
            "spatial index built"
        );
        warnings
    }

    fn partition(
        &self,
        bounds: Bounds,
        depth: usize,
        entries: Vec<Entry>,
        shape: &mut TreeShape,
    ) -> Partition {
        shape.partition_count += 1;
        shape.max_depth_reached = shape.max_depth_reached.max(depth);

        // Subdivide only when over capacity and under the depth cap. The cap
        // guarantees termination for coincident points.
        if entries.len() <= self.config.max_nodes_per_leaf || depth >= self.config.max_depth {
            shape.leaf_count += 1;
            return Partition {
                bounds,
                kind: PartitionKind::Leaf(entries),
            };
        }

        let dimensions = self.config.dimensions;
        let mut buckets: Vec<Vec<Entry>> = vec![Vec::new(); dimensions.branching()];
        for entry in entries {
            buckets[bounds.child_index(entry.point, dimensions)].push(entry);
        }

        let children = buckets
            .into_iter()
            .enumerate()
            .map(|(i, bucket)| self.partition(bounds.child(i, dimensions), depth + 1, bucket, shape))
            .collect();

        Partition {
            bounds,
            kind: PartitionKind::Branch(children),
        }
    }

    /// Feed new authoritative positions.
    ///
    /// With [`RebuildStrategy::Automatic`] the index rebuilds immediately.
    /// With [`RebuildStrategy::Manual`] the positions are held until
    /// [`SpatialIndex::rebuild`] and queries keep answering from the old tree.
    pub fn update_positions(&mut self, positions: &HashMap<NodeId, Point>) -> Vec<Warning> {
        let points: Vec<(NodeId, Point)> = positions.iter().map(|(&id, &p)| (id, p)).collect();
        match self.config.rebuild {
            RebuildStrategy::Automatic => self.build_from_points(points),
            RebuildStrategy::Manual => {
                self.pending = Some(points);
                Vec::new()
            }
        }
    }

    /// Apply positions held back by a manual rebuild strategy.
    ///
    /// Returns false when nothing was pending.
    pub fn rebuild(&mut self) -> bool {
        match self.pending.take() {
            Some(points) => {
                for warning in self.build_from_points(points) {
                    tracing::warn!(%warning, "spatial index rebuild");
                }
                true
            }
            None => false,
        }
    }

    /// True when positions are waiting for a manual rebuild.
    pub fn is_stale(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop all entries; queries return empty until the next build.
    pub fn clear(&mut self) {
        self.root = Partition::empty_root();
        self.len = 0;
        self.shape = TreeShape {
            leaf_count: 1,
            partition_count: 1,
            ..TreeShape::default()
        };
        self.pending = None;
        self.build_time_ms = 0.0;
        self.cache.lock().reset(self.config.cache_size);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn cached(&self, key: QueryKey) -> Option<CachedResult> {
        if !self.config.enable_caching {
            return None;
        }
        self.cache.lock().get(&key)
    }

    fn remember(&self, key: QueryKey, value: CachedResult) {
        if self.config.enable_caching {
            self.cache.lock().insert(key, value);
        }
    }

    /// Find the nearest node to `point`, optionally within `max_distance`.
    ///
    /// Exact distance ties resolve to the lower node id.
    pub fn find_nearest(&self, point: Point, max_distance: Option<f64>) -> Option<NodeId> {
        if self.len == 0 || !point.is_finite() {
            return None;
        }
        let point = point.project(self.config.dimensions);
        let max_distance = max_distance.unwrap_or(f64::INFINITY);
        if max_distance.is_nan() || max_distance < 0.0 {
            return None;
        }

        let key = QueryKey::nearest(point, max_distance);
        if let Some(CachedResult::Nearest(hit)) = self.cached(key) {
            return hit;
        }

        let mut best: Option<(f64, NodeId)> = None;
        let limit = max_distance * max_distance;
        Self::nearest_recursive(&self.root, point, limit, &mut best);
        let found = best.map(|(_, id)| id);

        self.remember(key, CachedResult::Nearest(found));
        found
    }

    fn nearest_recursive(
        partition: &Partition,
        point: Point,
        limit: f64,
        best: &mut Option<(f64, NodeId)>,
    ) {
        let bound = best.map_or(limit, |(d, _)| d);
        if partition.bounds.distance_squared_to(point) > bound {
            return;
        }

        match &partition.kind {
            PartitionKind::Leaf(entries) => {
                for entry in entries {
                    let d = entry.point.distance_squared(point);
                    if d > limit {
                        continue;
                    }
                    let better = match *best {
                        None => true,
                        Some((best_d, best_id)) => d < best_d || (d == best_d && entry.id < best_id),
                    };
                    if better {
                        *best = Some((d, entry.id));
                    }
                }
            }
            PartitionKind::Branch(children) => {
                // Visit closer children first for better pruning.
                let mut order: Vec<(f64, &Partition)> = children
                    .iter()
                    .map(|c| (c.bounds.distance_squared_to(point), c))
                    .collect();
                order.sort_by(|a, b| a.0.total_cmp(&b.0));
                for (_, child) in order {
                    Self::nearest_recursive(child, point, limit, best);
                }
            }
        }
    }

    /// Nearest node within the configured point-query tolerance.
    pub fn hit_test(&self, point: Point) -> Option<NodeId> {
        self.find_nearest(point, Some(self.config.point_query_tolerance))
    }

    /// All nodes whose coordinates lie inside `bounds` (inclusive), sorted by id.
    pub fn query_region(&self, bounds: &Bounds) -> Vec<NodeId> {
        if self.len == 0 {
            return Vec::new();
        }
        let region = match self.config.dimensions {
            Dimensions::Two => Bounds::new(
                Point::new(bounds.min.x, bounds.min.y, f64::NEG_INFINITY),
                Point::new(bounds.max.x, bounds.max.y, f64::INFINITY),
            ),
            Dimensions::Three => *bounds,
        };

        let key = QueryKey::region(&region);
        if let Some(CachedResult::Nodes(ids)) = self.cached(key) {
            return ids;
        }

        let mut out = Vec::new();
        Self::collect(&self.root, &mut out, &|b: &Bounds| b.intersects(&region), &|p: Point| region.contains(p));
        out.sort_unstable();

        self.remember(key, CachedResult::Nodes(out.clone()));
        out
    }

    /// All nodes within `distance` of `point` (inclusive), sorted by id.
    pub fn get_nodes_within_distance(&self, point: Point, distance: f64) -> Vec<NodeId> {
        if self.len == 0 || !point.is_finite() || distance.is_nan() || distance < 0.0 {
            return Vec::new();
        }
        let point = point.project(self.config.dimensions);

        let key = QueryKey::radius(point, distance);
        if let Some(CachedResult::Nodes(ids)) = self.cached(key) {
            return ids;
        }

        let r2 = distance * distance;
        let mut out = Vec::new();
        Self::collect(
            &self.root,
            &mut out,
            &|b: &Bounds| b.distance_squared_to(point) <= r2,
            &|p: Point| p.distance_squared(point) <= r2,
        );
        out.sort_unstable();

        self.remember(key, CachedResult::Nodes(out.clone()));
        out
    }

    fn collect(
        partition: &Partition,
        out: &mut Vec<NodeId>,
        visit: &dyn Fn(&Bounds) -> bool,
        accept: &dyn Fn(Point) -> bool,
    ) {
        if !visit(&partition.bounds) {
            return;
        }
        match &partition.kind {
            PartitionKind::Leaf(entries) => {
                out.extend(entries.iter().filter(|e| accept(e.point)).map(|e| e.id));
            }
            PartitionKind::Branch(children) => {
                for child in children {
                    Self::collect(child, out, visit, accept);
                }
            }
        }
    }

    /// Ray intersections within the configured tolerance, nearest first.
    pub fn query_ray(&self, ray: &Ray) -> Result<Vec<RayIntersection>> {
        RaycastingSystem::new().raycast(ray, self)
    }

    /// Positions of every indexed node.
    pub fn positions(&self) -> HashMap<NodeId, Point> {
        let mut out = HashMap::with_capacity(self.len);
        let mut stack = vec![&self.root];
        while let Some(partition) = stack.pop() {
            match &partition.kind {
                PartitionKind::Leaf(entries) => {
                    out.extend(entries.iter().map(|e| (e.id, e.point)));
                }
                PartitionKind::Branch(children) => stack.extend(children.iter()),
            }
        }
        out
    }

    pub fn get_statistics(&self) -> IndexStatistics {
        let cache = self.cache.lock();
        let average_occupancy = if self.shape.leaf_count == 0 {
            0.0
        } else {
            self.len as f64 / self.shape.leaf_count as f64
        };
        IndexStatistics {
            node_count: self.len,
            max_depth_reached: self.shape.max_depth_reached,
            leaf_count: self.shape.leaf_count,
            partition_count: self.shape.partition_count,
            average_occupancy,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cached_queries: cache.len(),
            build_time_ms: self.build_time_ms,
            stale: self.pending.is_some(),
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::empty(SpatialIndexConfig::default())
    }
}
