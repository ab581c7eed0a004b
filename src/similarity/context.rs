//! Shared state handed to scoring functions during clustering.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::graph::{ClusterId, Metadata, Node, NodeId, Point};

use super::resolver::ConflictStrategy;

/// Running counters for one clustering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceCounters {
    pub similarity_calculations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failed_calculations: u64,
    pub merges: u64,
}

/// Everything a scoring function may consult besides the two nodes.
///
/// Scoring functions only ever see `&ClusteringContext`; the clustering
/// driver owns the mutable bookkeeping (cache, counters, assignments).
#[derive(Debug, Clone, Default)]
pub struct ClusteringContext {
    /// Simulation iteration at which this pass runs.
    pub iteration: usize,
    /// Metadata snapshot keyed by node.
    pub node_metadata: HashMap<NodeId, Metadata>,
    /// Current simulated positions.
    pub positions: HashMap<NodeId, Point>,
    pub similarity_threshold: f64,
    pub max_cluster_size: usize,
    /// Per-measure weights for conflict resolution.
    pub weights: HashMap<String, f64>,
    pub strategy: ConflictStrategy,
    /// Free-form measure parameters, shaped by each measure's schema.
    pub parameters: Metadata,
    pub counters: PerformanceCounters,
    similarity_cache: HashMap<(NodeId, NodeId), f64>,
    pub cluster_assignments: HashMap<NodeId, ClusterId>,
}

fn pair_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl ClusteringContext {
    pub fn new(similarity_threshold: f64, max_cluster_size: usize, strategy: ConflictStrategy) -> Self {
        Self {
            similarity_threshold,
            max_cluster_size,
            strategy,
            ..Self::default()
        }
    }

    /// Snapshot metadata and positions from a node set.
    pub fn with_nodes<'a>(mut self, nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        for node in nodes {
            self.node_metadata.insert(node.id, node.metadata.clone());
            if let Some(p) = node.position {
                self.positions.insert(node.id, p);
            }
            if let Some(c) = node.cluster {
                self.cluster_assignments.insert(node.id, c);
            }
        }
        self
    }

    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_parameters(mut self, parameters: Metadata) -> Self {
        self.parameters = parameters;
        self
    }

    /// Weight configured for a measure (1.0 when unset).
    pub fn weight(&self, measure_id: &str) -> f64 {
        self.weights.get(measure_id).copied().unwrap_or(1.0)
    }

    /// Position of a node from the snapshot, falling back to the node itself.
    pub fn position_of(&self, node: &Node) -> Option<Point> {
        self.positions.get(&node.id).copied().or(node.position)
    }

    /// Cached resolved similarity for an unordered pair.
    pub fn cached_similarity(&mut self, a: NodeId, b: NodeId) -> Option<f64> {
        let hit = self.similarity_cache.get(&pair_key(a, b)).copied();
        if hit.is_some() {
            self.counters.cache_hits += 1;
        } else {
            self.counters.cache_misses += 1;
        }
        hit
    }

    pub fn store_similarity(&mut self, a: NodeId, b: NodeId, score: f64) {
        self.similarity_cache.insert(pair_key(a, b), score);
    }

    pub fn cached_pairs(&self) -> usize {
        self.similarity_cache.len()
    }

    /// Forget cached scores, e.g. after positions moved.
    pub fn invalidate_cache(&mut self) {
        self.similarity_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_is_unordered() {
        let mut ctx = ClusteringContext::new(0.5, 10, ConflictStrategy::Average);
        assert_eq!(ctx.cached_similarity(NodeId(1), NodeId(2)), None);
        ctx.store_similarity(NodeId(2), NodeId(1), 0.75);
        assert_eq!(ctx.cached_similarity(NodeId(1), NodeId(2)), Some(0.75));
        assert_eq!(ctx.counters.cache_hits, 1);
        assert_eq!(ctx.counters.cache_misses, 1);
        ctx.invalidate_cache();
        assert_eq!(ctx.cached_pairs(), 0);
    }

    #[test]
    fn test_snapshot_from_nodes() {
        let nodes = vec![
            Node::at(1, 1.0, 2.0).with_metadata("kind", "a"),
            Node::new(2).with_cluster(ClusterId(4)),
        ];
        let ctx = ClusteringContext::default().with_nodes(&nodes);
        assert_eq!(ctx.node_metadata.len(), 2);
        assert_eq!(ctx.positions.get(&NodeId(1)), Some(&Point::new_2d(1.0, 2.0)));
        assert_eq!(ctx.cluster_assignments.get(&NodeId(2)), Some(&ClusterId(4)));
        assert_eq!(ctx.weight("missing"), 1.0);
    }
}
