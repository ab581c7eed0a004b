//! Registry of runtime-registered similarity measures.
//!
//! Registration is the only place a malformed measure is rejected outright:
//! - structural checks (every descriptive field, a scorer, an object schema)
//! - id uniqueness within the similarity namespace
//! - behavioural checks that run the scorer against synthetic node pairs
//!
//! After registration, failures inside a scorer are logged and that measure is
//! skipped; a calculation never aborts because one measure misbehaves.
//!
//! The registry is an explicit instance. Components that need it receive an
//! `Arc<SimilarityFunctionRegistry>`.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Stopwatch;
use crate::error::{Error, MeasureError, Result, Severity, Warning, WarningKind};
use crate::graph::{Node, Point};

use super::context::ClusteringContext;
use super::measure::{CompatibilityFunction, MeasureInfo, SimilarityMeasure};
use super::resolver::ConflictResolver;

/// Limits applied by behavioural validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationPolicy {
    /// Synthetic calls used to measure latency.
    pub latency_samples: usize,
    /// Mean latency above which registration warns.
    pub max_mean_latency_ms: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            latency_samples: 100,
            max_mean_latency_ms: 1.0,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReport {
    pub id: String,
    pub warnings: Vec<Warning>,
    pub mean_latency_ms: f64,
}

/// Score of one measure within a multi-measure evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureScore {
    pub id: String,
    pub score: f64,
    pub weight: f64,
}

/// A measure skipped during a multi-measure evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureFailure {
    pub id: String,
    pub reason: String,
}

/// Result of [`SimilarityFunctionRegistry::calculate_multi_similarity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityBreakdown {
    /// Resolved score.
    pub score: f64,
    pub scores: Vec<MeasureScore>,
    pub failures: Vec<MeasureFailure>,
    pub warnings: Vec<Warning>,
}

/// Runtime-extensible similarity registry.
pub struct SimilarityFunctionRegistry {
    measures: RwLock<IndexMap<String, SimilarityMeasure>>,
    compatibility: RwLock<IndexMap<String, CompatibilityFunction>>,
    resolver: ConflictResolver,
    policy: ValidationPolicy,
}

impl SimilarityFunctionRegistry {
    pub fn new() -> Self {
        Self::with_policy(ValidationPolicy::default())
    }

    pub fn with_policy(policy: ValidationPolicy) -> Self {
        Self {
            measures: RwLock::new(IndexMap::new()),
            compatibility: RwLock::new(IndexMap::new()),
            resolver: ConflictResolver::new(),
            policy,
        }
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Validate and register a measure.
    pub fn register(&self, measure: SimilarityMeasure) -> Result<RegistrationReport> {
        Self::check_structure(&measure)?;
        if self.measures.read().contains_key(&measure.id) {
            return Err(Error::DuplicateMeasure(measure.id));
        }

        let (warnings, mean_latency_ms) = self.check_behaviour(&measure)?;
        for warning in &warnings {
            tracing::warn!(measure = %measure.id, %warning, "similarity measure registered with warning");
        }

        let id = measure.id.clone();
        {
            let mut measures = self.measures.write();
            // Re-check under the write lock; validation ran unlocked.
            if measures.contains_key(&id) {
                return Err(Error::DuplicateMeasure(id));
            }
            measures.insert(id.clone(), measure);
        }
        tracing::info!(measure = %id, mean_latency_ms, "similarity measure registered");

        Ok(RegistrationReport {
            id,
            warnings,
            mean_latency_ms,
        })
    }

    fn check_structure(measure: &SimilarityMeasure) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidMeasure {
            id: measure.id.clone(),
            reason: reason.to_string(),
        };
        if measure.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if measure.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if measure.description.trim().is_empty() {
            return Err(invalid("description is empty"));
        }
        if measure.version.trim().is_empty() {
            return Err(invalid("version is empty"));
        }
        if !measure.config_schema.is_object() {
            return Err(invalid("config schema must be a JSON object"));
        }
        if !measure.has_scorer() {
            return Err(invalid("scoring function is missing"));
        }
        Ok(())
    }

    /// Run the scorer against synthetic pairs. Returns the warnings and the
    /// mean latency in milliseconds.
    fn check_behaviour(&self, measure: &SimilarityMeasure) -> Result<(Vec<Warning>, f64)> {
        let pairs = synthetic_pairs();
        let ctx = ClusteringContext::new(0.5, 10, Default::default())
            .with_nodes(pairs.iter().flat_map(|(a, b)| [a, b]));

        let mut warnings = Vec::new();
        let mut out_of_range = false;
        for (a, b) in &pairs {
            let score = measure.score(a, b, &ctx).map_err(|err| Error::InvalidMeasure {
                id: measure.id.clone(),
                reason: format!("synthetic evaluation failed: {err}"),
            })?;
            if !score.is_finite() {
                return Err(Error::InvalidMeasure {
                    id: measure.id.clone(),
                    reason: format!("synthetic evaluation returned non-finite score {score}"),
                });
            }
            if !(0.0..=1.0).contains(&score) {
                out_of_range = true;
            }
        }
        if out_of_range {
            warnings.push(Warning::new(
                WarningKind::Validation,
                Severity::Low,
                format!("measure `{}` returned scores outside [0, 1]", measure.id),
            ));
        }

        let samples = self.policy.latency_samples.max(1);
        let watch = Stopwatch::start();
        for i in 0..samples {
            let (a, b) = &pairs[i % pairs.len()];
            // Results were validated above; only the timing matters here.
            let _ = measure.score(a, b, &ctx);
        }
        let mean_latency_ms = watch.elapsed_ms() / samples as f64;
        if mean_latency_ms > self.policy.max_mean_latency_ms {
            warnings.push(Warning::new(
                WarningKind::Validation,
                Severity::Medium,
                format!(
                    "measure `{}` averaged {mean_latency_ms:.3}ms per call (budget {}ms)",
                    measure.id, self.policy.max_mean_latency_ms
                ),
            ));
        }

        Ok((warnings, mean_latency_ms))
    }

    /// Remove a measure. Returns false when it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.measures.write().shift_remove(id).is_some()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn contains(&self, id: &str) -> bool {
        self.measures.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<SimilarityMeasure> {
        self.measures.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.measures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.read().is_empty()
    }

    /// Registered measures in registration order.
    pub fn list(&self) -> Vec<MeasureInfo> {
        self.measures.read().values().map(SimilarityMeasure::info).collect()
    }

    /// Ids of the measures tagged with `category`.
    pub fn measures_in_category(&self, category: &str) -> Vec<String> {
        self.measures
            .read()
            .values()
            .filter(|m| m.categories.iter().any(|c| c == category))
            .map(|m| m.id.clone())
            .collect()
    }

    /// Every category in use, with its measure count.
    pub fn categories(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for measure in self.measures.read().values() {
            let unique: BTreeSet<&String> = measure.categories.iter().collect();
            for category in unique {
                *out.entry(category.clone()).or_insert(0) += 1;
            }
        }
        out
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    /// Score a pair with one measure.
    pub fn calculate_similarity(&self, id: &str, a: &Node, b: &Node, ctx: &ClusteringContext) -> Result<f64> {
        let measure = self
            .get(id)
            .ok_or_else(|| Error::UnknownMeasure(id.to_string()))?;
        let score = measure.score(a, b, ctx).map_err(|source| Error::MeasureFailed {
            id: id.to_string(),
            source,
        })?;
        if !score.is_finite() {
            return Err(Error::MeasureFailed {
                id: id.to_string(),
                source: MeasureError::Failed(format!("non-finite score {score}")),
            });
        }
        Ok(score)
    }

    /// Score a pair with several measures and resolve them into one value.
    ///
    /// Weights and strategy come from `ctx`. Unknown or failing measures are
    /// logged and skipped; when every measure fails the score is 0.
    pub fn calculate_multi_similarity<S: AsRef<str>>(
        &self,
        measure_ids: &[S],
        a: &Node,
        b: &Node,
        ctx: &ClusteringContext,
    ) -> SimilarityBreakdown {
        let mut scores = Vec::with_capacity(measure_ids.len());
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        for id in measure_ids {
            let id = id.as_ref();
            match self.calculate_similarity(id, a, b, ctx) {
                Ok(score) => scores.push(MeasureScore {
                    id: id.to_string(),
                    score,
                    weight: ctx.weight(id),
                }),
                Err(err) => {
                    tracing::warn!(measure = id, error = %err, "similarity measure skipped");
                    warnings.push(Warning::new(WarningKind::Runtime, Severity::Medium, err.to_string()));
                    failures.push(MeasureFailure {
                        id: id.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let weights: Vec<f64> = scores.iter().map(|s| s.weight).collect();
        let score = if values.is_empty() {
            0.0
        } else {
            let resolution = self.resolver.resolve(&values, &weights, ctx.strategy);
            if let Some(warning) = resolution.warning {
                tracing::warn!(%warning, "similarity resolution fell back");
                warnings.push(warning);
            }
            resolution.value
        };

        SimilarityBreakdown {
            score,
            scores,
            failures,
            warnings,
        }
    }

    // =========================================================================
    // Compatibility namespace
    // =========================================================================

    /// Register a compatibility function. Its ids never collide with
    /// similarity measure ids.
    pub fn register_compatibility(&self, function: CompatibilityFunction) -> Result<()> {
        if function.id.trim().is_empty() {
            return Err(Error::InvalidMeasure {
                id: function.id,
                reason: "id is empty".into(),
            });
        }
        let mut table = self.compatibility.write();
        if table.contains_key(&function.id) {
            return Err(Error::DuplicateMeasure(function.id));
        }
        table.insert(function.id.clone(), function);
        Ok(())
    }

    pub fn check_compatibility(&self, id: &str, a: &Node, b: &Node) -> Result<bool> {
        let function = self
            .compatibility
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownMeasure(id.to_string()))?;
        Ok(function.check(a, b))
    }

    pub fn compatibility_ids(&self) -> Vec<String> {
        self.compatibility.read().keys().cloned().collect()
    }
}

impl Default for SimilarityFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Node pairs used to exercise a scorer before it is accepted.
fn synthetic_pairs() -> Vec<(Node, Node)> {
    vec![
        (
            Node::at(0, 0.0, 0.0).with_metadata("type", "service").with_metadata("tier", 1),
            Node::at(1, 0.0, 0.0).with_metadata("type", "service").with_metadata("tier", 1),
        ),
        (
            Node::at(2, 0.0, 0.0).with_metadata("type", "service"),
            Node::at(3, 250.0, -120.0).with_metadata("type", "database").with_metadata("tier", 3),
        ),
        (Node::new(4), Node::new(5)),
        (
            Node::new(6).with_position(Point::new(1.0e4, -1.0e4, 50.0)).with_metadata("label", "far"),
            Node::at(7, -1.0e4, 1.0e4),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::ConflictStrategy;

    fn constant(id: &str, value: f64) -> SimilarityMeasure {
        SimilarityMeasure::new(id)
            .name(format!("Constant {value}"))
            .description("returns a fixed score")
            .version("1.0.0")
            .schema(serde_json::json!({}))
            .category("test")
            .scorer_fn(move |_, _, _| value)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SimilarityFunctionRegistry::new();
        let report = registry.register(constant("half", 0.5)).unwrap();
        assert_eq!(report.id, "half");
        assert!(report.warnings.is_empty());
        assert!(registry.contains("half"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].name, "Constant 0.5");
        assert_eq!(registry.measures_in_category("test"), vec!["half".to_string()]);
        assert_eq!(registry.categories().get("test"), Some(&1));
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("dup", 0.5)).unwrap();
        assert!(matches!(
            registry.register(constant("dup", 0.1)),
            Err(Error::DuplicateMeasure(id)) if id == "dup"
        ));
    }

    #[test]
    fn test_structural_checks() {
        let registry = SimilarityFunctionRegistry::new();
        let missing_description = constant("x", 0.5).description("");
        assert!(matches!(
            registry.register(missing_description),
            Err(Error::InvalidMeasure { .. })
        ));

        let no_scorer = SimilarityMeasure::new("y")
            .name("Y")
            .description("no scorer")
            .version("1")
            .schema(serde_json::json!({}));
        let err = registry.register(no_scorer).unwrap_err();
        assert!(err.to_string().contains("scoring function is missing"));

        let bad_schema = constant("z", 0.5).schema(serde_json::Value::Null);
        assert!(registry.register(bad_schema).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_behavioural_rejections() {
        let registry = SimilarityFunctionRegistry::new();
        assert!(registry.register(constant("nan", f64::NAN)).is_err());
        assert!(registry.register(constant("inf", f64::INFINITY)).is_err());

        let wrong_type = constant("wrong", 0.0).scorer(|_, _, _| Err(MeasureError::WrongType("string".into())));
        let err = registry.register(wrong_type).unwrap_err();
        assert!(err.to_string().contains("expected a number"));

        let panicking = constant("panics", 0.0).scorer_fn(|a, _, _| {
            if a.metadata.is_empty() {
                panic!("no metadata");
            }
            0.5
        });
        assert!(registry.register(panicking).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_out_of_range_warns_but_registers() {
        let registry = SimilarityFunctionRegistry::new();
        let report = registry.register(constant("big", 4.0)).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::Validation);
        assert!(registry.contains("big"));
    }

    #[test]
    fn test_slow_measure_warns() {
        let registry = SimilarityFunctionRegistry::with_policy(ValidationPolicy {
            latency_samples: 5,
            max_mean_latency_ms: 1.0,
        });
        let slow = constant("slow", 0.5).scorer_fn(|_, _, _| {
            std::thread::sleep(std::time::Duration::from_millis(3));
            0.5
        });
        let report = registry.register(slow).unwrap();
        assert!(report.mean_latency_ms > 1.0);
        assert!(report.warnings.iter().any(|w| w.message.contains("per call")));
    }

    #[test]
    fn test_single_measure_returns_its_score() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("q", 0.37)).unwrap();
        let ctx = ClusteringContext::new(0.5, 10, ConflictStrategy::Max);
        let breakdown = registry.calculate_multi_similarity(&["q"], &Node::new(1), &Node::new(2), &ctx);
        assert_eq!(breakdown.score, 0.37);
        assert!(breakdown.failures.is_empty());
    }

    #[test]
    fn test_multi_similarity_strategies() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("low", 0.2)).unwrap();
        registry.register(constant("high", 0.8)).unwrap();
        let (a, b) = (Node::new(1), Node::new(2));

        let ctx = ClusteringContext::new(0.5, 10, ConflictStrategy::Average);
        let avg = registry.calculate_multi_similarity(&["low", "high"], &a, &b, &ctx);
        assert!((avg.score - 0.5).abs() < 1e-12);

        let ctx = ClusteringContext::new(0.5, 10, ConflictStrategy::Max);
        let max = registry.calculate_multi_similarity(&["low", "high"], &a, &b, &ctx);
        assert_eq!(max.score, 0.8);
    }

    #[test]
    fn test_runtime_failure_is_skipped() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("ok", 0.6)).unwrap();
        let flaky = constant("flaky", 0.0).scorer(|a, _, _| {
            if a.id.raw() == 99 {
                Err(MeasureError::Failed("cannot score node 99".into()))
            } else {
                Ok(0.1)
            }
        });
        registry.register(flaky).unwrap();

        let ctx = ClusteringContext::new(0.5, 10, ConflictStrategy::Average);
        let breakdown =
            registry.calculate_multi_similarity(&["ok", "flaky", "missing"], &Node::new(99), &Node::new(2), &ctx);
        assert_eq!(breakdown.score, 0.6);
        assert_eq!(breakdown.scores.len(), 1);
        assert_eq!(breakdown.failures.len(), 2);
        assert!(breakdown.warnings.iter().all(|w| w.kind == WarningKind::Runtime));
    }

    #[test]
    fn test_weights_from_context() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("one", 1.0)).unwrap();
        registry.register(constant("zero", 0.0)).unwrap();
        let ctx = ClusteringContext::new(0.5, 10, ConflictStrategy::WeightedAverage)
            .with_weights([("one".to_string(), 3.0), ("zero".to_string(), 1.0)].into());
        let breakdown = registry.calculate_multi_similarity(&["one", "zero"], &Node::new(1), &Node::new(2), &ctx);
        assert_eq!(breakdown.score, 0.75);
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("shared-id", 0.5)).unwrap();
        registry
            .register_compatibility(CompatibilityFunction::new("shared-id", "Always", |_, _| true))
            .unwrap();
        assert!(registry.contains("shared-id"));
        assert_eq!(registry.compatibility_ids(), vec!["shared-id".to_string()]);
        assert!(registry.check_compatibility("shared-id", &Node::new(1), &Node::new(2)).unwrap());
        assert!(registry.check_compatibility("nope", &Node::new(1), &Node::new(2)).is_err());
        assert!(registry
            .register_compatibility(CompatibilityFunction::new("shared-id", "Again", |_, _| false))
            .is_err());
    }

    #[test]
    fn test_unregister() {
        let registry = SimilarityFunctionRegistry::new();
        registry.register(constant("gone", 0.5)).unwrap();
        assert!(registry.unregister("gone"));
        assert!(!registry.unregister("gone"));
        assert!(registry.register(constant("gone", 0.5)).is_ok());
    }
}
