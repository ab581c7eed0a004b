//! Edge type.
//!
//! Edges are read-only input to the link force. Each edge has:
//! - Source and target node IDs
//! - Optional weight (defaults to 1.0) scaling the link force
//! - Opaque caller metadata

use serde::{Deserialize, Serialize};

use super::node::{Metadata, NodeId};

/// A graph edge as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight: None,
            metadata: Metadata::new(),
        }
    }

    pub fn weighted(source: impl Into<NodeId>, target: impl Into<NodeId>, weight: f64) -> Self {
        Self {
            weight: Some(weight),
            ..Self::new(source, target)
        }
    }

    /// Effective weight; missing or non-finite weights count as 1.0.
    #[inline]
    pub fn effective_weight(&self) -> f64 {
        match self.weight {
            Some(w) if w.is_finite() && w >= 0.0 => w,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_weight() {
        assert_eq!(Edge::new(0, 1).effective_weight(), 1.0);
        assert_eq!(Edge::weighted(0, 1, 2.5).effective_weight(), 2.5);
        assert_eq!(Edge::weighted(0, 1, f64::NAN).effective_weight(), 1.0);
        assert_eq!(Edge::weighted(0, 1, -1.0).effective_weight(), 1.0);
    }

    #[test]
    fn test_edge_deserializes() {
        let edge: Edge = serde_json::from_str(r#"{"source": 1, "target": 2, "weight": 0.5}"#).unwrap();
        assert_eq!(edge.source, NodeId(1));
        assert_eq!(edge.target, NodeId(2));
        assert_eq!(edge.weight, Some(0.5));
    }
}
