//! Registry and conflict resolution behaviour seen from outside the crate.

use heroine_graph_layout::similarity::{ClusteringContext, SimilarityMeasure, register_builtin_measures};
use heroine_graph_layout::{ConflictResolver, ConflictStrategy, Node, SimilarityFunctionRegistry};
use proptest::prelude::*;

fn constant(id: &str, score: f64) -> SimilarityMeasure {
    SimilarityMeasure::new(id)
        .name(format!("Constant {score}"))
        .description("scores every pair the same")
        .version("1.0.0")
        .schema(serde_json::json!({}))
        .category("test")
        .scorer_fn(move |_, _, _| score)
}

fn context(strategy: ConflictStrategy) -> ClusteringContext {
    ClusteringContext::new(0.7, 50, strategy)
}

const STRATEGIES: [ConflictStrategy; 4] = [
    ConflictStrategy::Average,
    ConflictStrategy::WeightedAverage,
    ConflictStrategy::Max,
    ConflictStrategy::Min,
];

proptest! {
    #[test]
    fn single_measure_scores_exactly(score in 0.0f64..=1.0, strategy in prop::sample::select(STRATEGIES.to_vec())) {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("only", score)).unwrap();
        let breakdown = registry.calculate_multi_similarity(&["only"], &Node::new(1), &Node::new(2), &context(strategy));
        prop_assert_eq!(breakdown.score, score);
        prop_assert!(breakdown.failures.is_empty());
    }

    #[test]
    fn single_score_resolves_to_itself(
        x in 0.0f64..=1.0,
        weight in 0.01f64..10.0,
        strategy in prop::sample::select(STRATEGIES.to_vec()),
    ) {
        let resolver = ConflictResolver::new();
        let resolved = resolver.resolve_conflicts(&[x], &[weight], strategy);
        prop_assert!((resolved - x).abs() < 1e-12);
    }

    #[test]
    fn max_and_min_pick_extrema(scores in prop::collection::vec(0.0f64..=1.0, 1..20)) {
        let resolver = ConflictResolver::new();
        let weights = vec![1.0; scores.len()];
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        prop_assert_eq!(resolver.resolve_conflicts(&scores, &weights, ConflictStrategy::Max), max);
        prop_assert_eq!(resolver.resolve_conflicts(&scores, &weights, ConflictStrategy::Min), min);
    }
}

#[test]
fn test_two_measures_disagreeing() {
    let registry = SimilarityFunctionRegistry::new();
    registry.register(constant("low", 0.2)).unwrap();
    registry.register(constant("high", 0.8)).unwrap();
    let (a, b) = (Node::new(1), Node::new(2));

    let average = registry.calculate_multi_similarity(&["low", "high"], &a, &b, &context(ConflictStrategy::Average));
    assert!((average.score - 0.5).abs() < 1e-12);
    let max = registry.calculate_multi_similarity(&["low", "high"], &a, &b, &context(ConflictStrategy::Max));
    assert_eq!(max.score, 0.8);
}

#[test]
fn test_unknown_measure_skipped() {
    let registry = SimilarityFunctionRegistry::new();
    registry.register(constant("known", 0.4)).unwrap();
    let breakdown = registry.calculate_multi_similarity(
        &["known", "missing"],
        &Node::new(1),
        &Node::new(2),
        &context(ConflictStrategy::Average),
    );
    assert_eq!(breakdown.score, 0.4);
    assert_eq!(breakdown.failures.len(), 1);
    assert_eq!(breakdown.failures[0].id, "missing");
}

#[test]
fn test_builtins_score_metadata() {
    let registry = SimilarityFunctionRegistry::new();
    let reports = register_builtin_measures(&registry).unwrap();
    assert_eq!(reports.len(), 3);
    // A second call finds everything registered already.
    assert!(register_builtin_measures(&registry).unwrap().is_empty());

    let a = Node::new(1).with_metadata("type", "db").with_metadata("team", "core");
    let b = Node::new(2).with_metadata("type", "db").with_metadata("team", "edge");
    let ctx = context(ConflictStrategy::Average).with_nodes([&a, &b]);
    let matched = registry.calculate_similarity("attribute-match", &a, &b, &ctx).unwrap();
    assert_eq!(matched, 1.0);
    let jaccard = registry.calculate_similarity("metadata-jaccard", &a, &b, &ctx).unwrap();
    assert_eq!(jaccard, 0.5);
}

#[test]
fn test_conflict_statistics() {
    let resolver = ConflictResolver::new();
    assert!(resolver.has_significant_conflict(&[0.1, 0.9], 0.3));
    assert!(!resolver.has_significant_conflict(&[0.5, 0.6], 0.3));
    let stats = resolver.get_conflict_statistics(&[0.2, 0.8]);
    assert!((stats.mean - 0.5).abs() < 1e-12);
}
