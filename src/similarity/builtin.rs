//! Built-in similarity measures.
//!
//! These are not registered automatically; call [`register_builtin_measures`]
//! on a registry that should carry them.

use serde_json::{Value, json};

use crate::error::Result;
use crate::graph::Node;

use super::context::ClusteringContext;
use super::measure::SimilarityMeasure;
use super::registry::{RegistrationReport, SimilarityFunctionRegistry};

pub const METADATA_JACCARD: &str = "metadata-jaccard";
pub const SPATIAL_PROXIMITY: &str = "spatial-proximity";
pub const ATTRIBUTE_MATCH: &str = "attribute-match";

/// Distance at which spatial proximity scores 0.5.
const DEFAULT_PROXIMITY_SCALE: f64 = 100.0;
const DEFAULT_MATCH_ATTRIBUTE: &str = "type";

/// Jaccard index over metadata `(key, value)` pairs.
pub fn metadata_jaccard() -> SimilarityMeasure {
    SimilarityMeasure::new(METADATA_JACCARD)
        .name("Metadata Jaccard")
        .description("Share of metadata entries that are identical on both nodes")
        .version("1.0.0")
        .schema(json!({ "type": "object", "properties": {} }))
        .category("metadata")
        .scorer_fn(|a, b, _| {
            let union = a
                .metadata
                .keys()
                .chain(b.metadata.keys().filter(|k| !a.metadata.contains_key(*k)))
                .count();
            if union == 0 {
                return 0.0;
            }
            let shared = a
                .metadata
                .iter()
                .filter(|(k, v)| b.metadata.get(*k) == Some(*v))
                .count();
            shared as f64 / union as f64
        })
}

/// `1 / (1 + d / scale)`; 0 when either node has no position.
pub fn spatial_proximity() -> SimilarityMeasure {
    SimilarityMeasure::new(SPATIAL_PROXIMITY)
        .name("Spatial proximity")
        .description("Inverse distance between the current node positions")
        .version("1.0.0")
        .schema(json!({
            "type": "object",
            "properties": { "proximityScale": { "type": "number", "exclusiveMinimum": 0 } }
        }))
        .category("spatial")
        .scorer_fn(|a, b, ctx| {
            let (Some(pa), Some(pb)) = (ctx.position_of(a), ctx.position_of(b)) else {
                return 0.0;
            };
            let scale = number_parameter(ctx, "proximityScale")
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(DEFAULT_PROXIMITY_SCALE);
            1.0 / (1.0 + pa.distance(pb) / scale)
        })
}

/// 1 when both nodes carry the same value for the configured attribute.
pub fn attribute_match() -> SimilarityMeasure {
    SimilarityMeasure::new(ATTRIBUTE_MATCH)
        .name("Attribute match")
        .description("Equality of one metadata attribute, `type` unless configured")
        .version("1.0.0")
        .schema(json!({
            "type": "object",
            "properties": { "attribute": { "type": "string" } }
        }))
        .category("metadata")
        .scorer_fn(|a, b, ctx| {
            let attribute = ctx
                .parameters
                .get("attribute")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MATCH_ATTRIBUTE);
            match (attribute_value(a, attribute), attribute_value(b, attribute)) {
                (Some(x), Some(y)) if x == y => 1.0,
                _ => 0.0,
            }
        })
}

fn number_parameter(ctx: &ClusteringContext, key: &str) -> Option<f64> {
    ctx.parameters.get(key).and_then(Value::as_f64)
}

fn attribute_value<'a>(node: &'a Node, attribute: &str) -> Option<&'a Value> {
    node.metadata.get(attribute).filter(|v| !v.is_null())
}

/// Register every built-in measure, skipping ones already present.
pub fn register_builtin_measures(registry: &SimilarityFunctionRegistry) -> Result<Vec<RegistrationReport>> {
    let mut reports = Vec::new();
    for measure in [metadata_jaccard(), spatial_proximity(), attribute_match()] {
        if registry.contains(&measure.id) {
            continue;
        }
        reports.push(registry.register(measure)?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, Point};

    #[test]
    fn test_register_builtins_is_idempotent() {
        let registry = SimilarityFunctionRegistry::new();
        let reports = register_builtin_measures(&registry).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(register_builtin_measures(&registry).unwrap().is_empty());
        assert_eq!(registry.measures_in_category("metadata").len(), 2);
    }

    #[test]
    fn test_metadata_jaccard() {
        let ctx = ClusteringContext::default();
        let a = Node::new(1).with_metadata("type", "svc").with_metadata("team", "core");
        let b = Node::new(2).with_metadata("type", "svc").with_metadata("team", "edge");
        let c = Node::new(3).with_metadata("type", "svc");
        let m = metadata_jaccard();
        assert_eq!(m.score(&a, &b, &ctx), Ok(0.5));
        assert_eq!(m.score(&a, &c, &ctx), Ok(0.5));
        assert_eq!(m.score(&a, &a, &ctx), Ok(1.0));
        assert_eq!(m.score(&Node::new(4), &Node::new(5), &ctx), Ok(0.0));
    }

    #[test]
    fn test_spatial_proximity_uses_context_positions() {
        let mut ctx = ClusteringContext::default();
        ctx.positions.insert(NodeId(1), Point::new_2d(0.0, 0.0));
        ctx.positions.insert(NodeId(2), Point::new_2d(100.0, 0.0));
        let m = spatial_proximity();
        let score = m.score(&Node::new(1), &Node::new(2), &ctx).unwrap();
        assert!((score - 0.5).abs() < 1e-12);

        let mut params = crate::graph::Metadata::new();
        params.insert("proximityScale".into(), json!(300.0));
        let ctx = ctx.with_parameters(params);
        let score = m.score(&Node::new(1), &Node::new(2), &ctx).unwrap();
        assert!((score - 0.75).abs() < 1e-12);

        assert_eq!(m.score(&Node::new(1), &Node::new(9), &ctx), Ok(0.0));
    }

    #[test]
    fn test_attribute_match() {
        let ctx = ClusteringContext::default();
        let m = attribute_match();
        let a = Node::new(1).with_metadata("type", "db").with_metadata("zone", "eu");
        let b = Node::new(2).with_metadata("type", "db").with_metadata("zone", "us");
        assert_eq!(m.score(&a, &b, &ctx), Ok(1.0));

        let mut params = crate::graph::Metadata::new();
        params.insert("attribute".into(), json!("zone"));
        let ctx = ctx.with_parameters(params);
        assert_eq!(m.score(&a, &b, &ctx), Ok(0.0));
        assert_eq!(m.score(&Node::new(3), &Node::new(4), &ctx), Ok(0.0));
    }
}
