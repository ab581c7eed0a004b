//! GraphTopology - per-run graph structure.
//!
//! The topology stores the node/edge set of one layout run using petgraph's
//! StableGraph, and maps stable [`NodeId`]s to dense slot indices so the force
//! simulation can keep positions and velocities in flat arrays.

use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Undirected;

use super::edge::Edge;
use super::node::{Node, NodeId};
use crate::error::Warning;

/// A resolved edge between two slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Graph topology for a single run.
///
/// This struct manages:
/// - Graph structure via petgraph (undirected, weights are edge weights)
/// - Deduplicated node copies in slot order
/// - ID mapping between stable IDs and slot indices
/// - Resolved links for the link force
pub struct GraphTopology {
    graph: StableGraph<NodeId, f64, Undirected>,
    id_to_slot: HashMap<NodeId, usize>,
    nodes: Vec<Node>,
    links: Vec<Link>,
}

impl GraphTopology {
    /// Build a topology from caller input.
    ///
    /// Duplicate node ids keep the last occurrence. Edges that reference
    /// unknown nodes are dropped. Both cases are reported as warnings.
    pub fn build(nodes: &[Node], edges: &[Edge]) -> (Self, Vec<Warning>) {
        let mut warnings = Vec::new();
        let mut graph = StableGraph::with_capacity(nodes.len(), edges.len());
        let mut id_to_slot: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
        let mut deduped: Vec<Node> = Vec::with_capacity(nodes.len());

        for node in nodes {
            if let Some(&slot) = id_to_slot.get(&node.id) {
                warnings.push(Warning::input(format!(
                    "duplicate node id {}, keeping the last occurrence",
                    node.id
                )));
                deduped[slot] = node.clone();
                continue;
            }
            let index = graph.add_node(node.id);
            debug_assert_eq!(index.index(), deduped.len());
            id_to_slot.insert(node.id, index.index());
            deduped.push(node.clone());
        }

        let mut links = Vec::with_capacity(edges.len());
        for edge in edges {
            let (Some(&source), Some(&target)) =
                (id_to_slot.get(&edge.source), id_to_slot.get(&edge.target))
            else {
                warnings.push(Warning::input(format!(
                    "edge {} -> {} references an unknown node and was dropped",
                    edge.source, edge.target
                )));
                continue;
            };
            let weight = edge.effective_weight();
            graph.add_edge(NodeIndex::new(source), NodeIndex::new(target), weight);
            links.push(Link {
                source,
                target,
                weight,
            });
        }

        let topology = Self {
            graph,
            id_to_slot,
            nodes: deduped,
            links,
        };
        (topology, warnings)
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of resolved edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Slot index of a node id.
    pub fn slot(&self, id: NodeId) -> Option<usize> {
        self.id_to_slot.get(&id).copied()
    }

    /// Node id stored at a slot.
    pub fn id(&self, slot: usize) -> NodeId {
        self.nodes[slot].id
    }

    /// Deduplicated nodes in slot order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, slot: usize) -> &Node {
        &self.nodes[slot]
    }

    /// Resolved links in input order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Number of incident edges (self loops count twice).
    pub fn degree(&self, slot: usize) -> usize {
        self.graph
            .edges(NodeIndex::new(slot))
            .map(|e| if e.source() == e.target() { 2 } else { 1 })
            .sum()
    }

    /// Neighbor slots of a node.
    pub fn neighbors(&self, slot: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors(NodeIndex::new(slot))
            .map(|n| n.index())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Total weight of the edges between two slots.
    pub fn edge_weight_between(&self, a: usize, b: usize) -> f64 {
        self.graph
            .edges_connecting(NodeIndex::new(a), NodeIndex::new(b))
            .map(|e| *e.weight())
            .sum()
    }
}
