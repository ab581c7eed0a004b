//! Similarity clustering at stabilization checkpoints.
//!
//! At each checkpoint the clusterer:
//! 1. Collects candidate pairs: graph neighbours plus nodes within
//!    `candidate_radius` (found through a freshly built [`SpatialIndex`])
//! 2. Scores each pair through the registry, resolving multi-measure
//!    disagreement with the configured strategy (scores are cached per pair
//!    for the whole run)
//! 3. Merges clusters greedily, best score first, while the score reaches the
//!    similarity threshold and the merged size stays within the maximum
//!
//! Caller-supplied cluster ids seed the initial groups and are kept on the
//! merged clusters; newly formed clusters receive fresh ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Severity, Warning, WarningKind};
use crate::graph::{ClusterId, Dimensions, GraphTopology, NodeId, Point};
use crate::similarity::{ClusteringContext, SimilarityFunctionRegistry};
use crate::spatial::{SpatialIndex, SpatialIndexConfig};

use super::config::ClusteringConfig;

/// A cluster in a finished layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub size: usize,
    pub centroid: Point,
    pub members: Vec<NodeId>,
}

/// What one checkpoint did.
#[derive(Debug, Clone, Default)]
pub(crate) struct CheckpointOutcome {
    pub pairs_scored: usize,
    pub merges: usize,
    pub warnings: Vec<Warning>,
}

pub(crate) struct Clusterer {
    registry: Arc<SimilarityFunctionRegistry>,
    config: ClusteringConfig,
    context: ClusteringContext,
    parent: Vec<usize>,
    size: Vec<usize>,
    /// Caller-supplied id carried by each slot, if any.
    seeded: Vec<Option<ClusterId>>,
}

impl Clusterer {
    pub fn new(
        registry: Arc<SimilarityFunctionRegistry>,
        config: &ClusteringConfig,
        topology: &GraphTopology,
    ) -> Self {
        let n = topology.node_count();
        let context = ClusteringContext::new(config.similarity_threshold, config.max_cluster_size, config.strategy)
            .with_nodes(topology.nodes())
            .with_weights(config.weights.clone())
            .with_parameters(config.parameters.clone());

        let seeded: Vec<Option<ClusterId>> = topology.nodes().iter().map(|node| node.cluster).collect();
        let mut clusterer = Self {
            registry,
            config: config.clone(),
            context,
            parent: (0..n).collect(),
            size: vec![1; n],
            seeded,
        };

        let mut first_slot: HashMap<ClusterId, usize> = HashMap::new();
        for slot in 0..n {
            if let Some(id) = clusterer.seeded[slot] {
                match first_slot.get(&id) {
                    Some(&root) => {
                        clusterer.union(root, slot);
                    }
                    None => {
                        first_slot.insert(id, slot);
                    }
                }
            }
        }
        clusterer
    }

    fn find(&mut self, mut slot: usize) -> usize {
        while self.parent[slot] != slot {
            self.parent[slot] = self.parent[self.parent[slot]];
            slot = self.parent[slot];
        }
        slot
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[absorb] = keep;
        self.size[keep] += self.size[absorb];
        true
    }

    pub fn context(&self) -> &ClusteringContext {
        &self.context
    }

    /// Run one clustering checkpoint against the current positions.
    pub fn checkpoint(
        &mut self,
        iteration: usize,
        topology: &GraphTopology,
        positions: &[Point],
        dimensions: Dimensions,
    ) -> CheckpointOutcome {
        let _span = tracing::debug_span!("layout.cluster", iteration).entered();
        let mut outcome = CheckpointOutcome::default();

        self.context.iteration = iteration;
        for (slot, point) in positions.iter().enumerate() {
            self.context.positions.insert(topology.id(slot), *point);
        }

        let candidates = self.candidates(topology, positions, dimensions, &mut outcome.warnings);

        let mut scored: Vec<(f64, usize, usize)> = Vec::with_capacity(candidates.len());
        for (a, b) in candidates {
            if self.find(a) == self.find(b) {
                continue;
            }
            let (ida, idb) = (topology.id(a), topology.id(b));
            let score = match self.context.cached_similarity(ida, idb) {
                Some(score) => score,
                None => {
                    let breakdown = self.registry.calculate_multi_similarity(
                        self.config.measure_ids.as_slice(),
                        topology.node(a),
                        topology.node(b),
                        &self.context,
                    );
                    self.context.counters.similarity_calculations += breakdown.scores.len() as u64;
                    self.context.counters.failed_calculations += breakdown.failures.len() as u64;
                    outcome.pairs_scored += 1;
                    for warning in breakdown.warnings {
                        if !outcome.warnings.contains(&warning) {
                            outcome.warnings.push(warning);
                        }
                    }
                    self.context.store_similarity(ida, idb, breakdown.score);
                    breakdown.score
                }
            };
            if score >= self.config.similarity_threshold {
                scored.push((score, a, b));
            }
        }

        scored.sort_by(|x, y| y.0.total_cmp(&x.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));
        for (_, a, b) in scored {
            let (ra, rb) = (self.find(a), self.find(b));
            if ra == rb || self.size[ra] + self.size[rb] > self.config.max_cluster_size {
                continue;
            }
            self.union(ra, rb);
            outcome.merges += 1;
        }
        self.context.counters.merges += outcome.merges as u64;

        tracing::debug!(
            iteration,
            pairs_scored = outcome.pairs_scored,
            merges = outcome.merges,
            "clustering checkpoint"
        );
        outcome
    }

    fn candidates(
        &self,
        topology: &GraphTopology,
        positions: &[Point],
        dimensions: Dimensions,
        warnings: &mut Vec<Warning>,
    ) -> BTreeSet<(usize, usize)> {
        let mut pairs = BTreeSet::new();
        let n = topology.node_count();
        for slot in 0..n {
            for neighbor in topology.neighbors(slot) {
                if neighbor != slot {
                    pairs.insert((slot.min(neighbor), slot.max(neighbor)));
                }
            }
        }

        if self.config.candidate_radius > 0.0 {
            let config = SpatialIndexConfig {
                enable_caching: false,
                ..SpatialIndexConfig::balanced()
            }
            .with_dimensions(dimensions);
            match SpatialIndex::new(config) {
                Ok(mut index) => {
                    index.build_from_points((0..n).map(|slot| (topology.id(slot), positions[slot])));
                    for (slot, point) in positions.iter().enumerate() {
                        for id in index.get_nodes_within_distance(*point, self.config.candidate_radius) {
                            if let Some(other) = topology.slot(id).filter(|&other| other != slot) {
                                pairs.insert((slot.min(other), slot.max(other)));
                            }
                        }
                    }
                }
                Err(err) => warnings.push(Warning::new(
                    WarningKind::Configuration,
                    Severity::Low,
                    format!("candidate index unavailable: {err}"),
                )),
            }
        }
        pairs
    }

    /// Group index per slot for the cluster force. Only clusters with two or
    /// more members get a group.
    pub fn groups(&mut self) -> Vec<Option<usize>> {
        let n = self.parent.len();
        let mut index_of_root: BTreeMap<usize, usize> = BTreeMap::new();
        let mut groups = vec![None; n];
        for slot in 0..n {
            let root = self.find(slot);
            if self.size[root] < 2 {
                continue;
            }
            let next = index_of_root.len();
            groups[slot] = Some(*index_of_root.entry(root).or_insert(next));
        }
        groups
    }

    /// Final cluster id per slot.
    ///
    /// A merged cluster keeps the smallest caller-supplied id among its
    /// members; clusters without one get fresh ids above every supplied id,
    /// in order of their first member.
    pub fn assignments(&mut self, topology: &GraphTopology) -> Vec<Option<ClusterId>> {
        let n = self.parent.len();
        let mut seeded_by_root: HashMap<usize, ClusterId> = HashMap::new();
        for slot in 0..n {
            if let Some(id) = self.seeded[slot] {
                let root = self.find(slot);
                let entry = seeded_by_root.entry(root).or_insert(id);
                if id < *entry {
                    *entry = id;
                }
            }
        }

        let mut next_id = self.seeded.iter().flatten().map(|c| c.0 + 1).max().unwrap_or(0);
        let mut fresh: HashMap<usize, ClusterId> = HashMap::new();
        let mut out = vec![None; n];
        for (slot, assignment) in out.iter_mut().enumerate() {
            let root = self.find(slot);
            if let Some(id) = seeded_by_root.get(&root) {
                *assignment = Some(*id);
            } else if self.size[root] >= 2 {
                let id = *fresh.entry(root).or_insert_with(|| {
                    let id = ClusterId(next_id);
                    next_id += 1;
                    id
                });
                *assignment = Some(id);
            }
        }
        for (slot, assignment) in out.iter().enumerate() {
            if let Some(id) = assignment {
                self.context.cluster_assignments.insert(topology.id(slot), *id);
            }
        }
        out
    }
}

/// Summaries of the clusters in `assignments`, ordered by cluster id.
pub(crate) fn summarize(
    topology: &GraphTopology,
    positions: &[Point],
    assignments: &[Option<ClusterId>],
) -> Vec<ClusterSummary> {
    let mut by_id: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
    for (slot, assignment) in assignments.iter().enumerate() {
        if let Some(id) = assignment {
            by_id.entry(*id).or_default().push(slot);
        }
    }
    by_id
        .into_iter()
        .map(|(id, slots)| {
            let mut sum = Point::ORIGIN;
            for &slot in &slots {
                sum += positions[slot];
            }
            ClusterSummary {
                id,
                size: slots.len(),
                centroid: sum * (1.0 / slots.len() as f64),
                members: slots.iter().map(|&slot| topology.id(slot)).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::similarity::register_builtin_measures;

    fn registry() -> Arc<SimilarityFunctionRegistry> {
        let registry = SimilarityFunctionRegistry::new();
        register_builtin_measures(&registry).unwrap();
        Arc::new(registry)
    }

    fn config() -> ClusteringConfig {
        ClusteringConfig {
            enabled: true,
            measure_ids: vec!["attribute-match".into()],
            similarity_threshold: 0.9,
            max_cluster_size: 3,
            candidate_radius: 0.0,
            ..ClusteringConfig::default()
        }
    }

    fn positions(topology: &GraphTopology) -> Vec<Point> {
        (0..topology.node_count()).map(|i| Point::new_2d(i as f64 * 10.0, 0.0)).collect()
    }

    #[test]
    fn test_neighbours_with_matching_type_merge() {
        let nodes = vec![
            Node::new(1).with_metadata("type", "db"),
            Node::new(2).with_metadata("type", "db"),
            Node::new(3).with_metadata("type", "web"),
        ];
        let edges = vec![Edge::new(1, 2), Edge::new(2, 3)];
        let (topology, _) = GraphTopology::build(&nodes, &edges);
        let mut clusterer = Clusterer::new(registry(), &config(), &topology);

        let outcome = clusterer.checkpoint(50, &topology, &positions(&topology), Dimensions::Two);
        assert_eq!(outcome.pairs_scored, 2);
        assert_eq!(outcome.merges, 1);

        let assignments = clusterer.assignments(&topology);
        assert_eq!(assignments[0], Some(ClusterId(0)));
        assert_eq!(assignments[1], Some(ClusterId(0)));
        assert_eq!(assignments[2], None);
        assert_eq!(clusterer.groups(), vec![Some(0), Some(0), None]);
    }

    #[test]
    fn test_max_cluster_size_respected() {
        let nodes: Vec<Node> = (0..5).map(|i| Node::new(i).with_metadata("type", "svc")).collect();
        let edges: Vec<Edge> = (0..4).map(|i| Edge::new(i, i + 1)).collect();
        let (topology, _) = GraphTopology::build(&nodes, &edges);
        let mut clusterer = Clusterer::new(registry(), &config(), &topology);
        clusterer.checkpoint(50, &topology, &positions(&topology), Dimensions::Two);

        let summaries = summarize(&topology, &positions(&topology), &clusterer.assignments(&topology));
        assert!(summaries.iter().all(|s| s.size <= 3));
        assert_eq!(summaries.iter().map(|s| s.size).sum::<usize>(), 5);
    }

    #[test]
    fn test_scores_are_cached_across_checkpoints() {
        let nodes = vec![
            Node::new(1).with_metadata("type", "a"),
            Node::new(2).with_metadata("type", "b"),
        ];
        let (topology, _) = GraphTopology::build(&nodes, &[Edge::new(1, 2)]);
        let mut clusterer = Clusterer::new(registry(), &config(), &topology);
        let first = clusterer.checkpoint(50, &topology, &positions(&topology), Dimensions::Two);
        let second = clusterer.checkpoint(100, &topology, &positions(&topology), Dimensions::Two);
        assert_eq!(first.pairs_scored, 1);
        assert_eq!(second.pairs_scored, 0);
        assert_eq!(clusterer.context().counters.cache_hits, 1);
        assert_eq!(clusterer.context().counters.merges, 0);
    }

    #[test]
    fn test_radius_candidates_and_seeded_ids() {
        let nodes = vec![
            Node::new(1).with_metadata("type", "x").with_cluster(ClusterId(7)),
            Node::new(2).with_metadata("type", "x"),
            Node::new(3).with_metadata("type", "x"),
            Node::new(4).with_metadata("type", "x"),
        ];
        let (topology, _) = GraphTopology::build(&nodes, &[]);
        let config = ClusteringConfig {
            candidate_radius: 15.0,
            max_cluster_size: 2,
            ..config()
        };
        let mut clusterer = Clusterer::new(registry(), &config, &topology);
        // Slots at x = 0, 10, 100, 110.
        let positions = vec![
            Point::new_2d(0.0, 0.0),
            Point::new_2d(10.0, 0.0),
            Point::new_2d(100.0, 0.0),
            Point::new_2d(110.0, 0.0),
        ];
        let outcome = clusterer.checkpoint(50, &topology, &positions, Dimensions::Two);
        assert_eq!(outcome.merges, 2);

        let assignments = clusterer.assignments(&topology);
        assert_eq!(assignments[0], Some(ClusterId(7)));
        assert_eq!(assignments[1], Some(ClusterId(7)));
        assert_eq!(assignments[2], Some(ClusterId(8)));
        assert_eq!(assignments[3], Some(ClusterId(8)));

        let summaries = summarize(&topology, &positions, &assignments);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].centroid, Point::new_2d(105.0, 0.0));
        assert_eq!(summaries[1].members, vec![NodeId(3), NodeId(4)]);
    }
}
