//! Conflict resolution between disagreeing similarity scores.
//!
//! Several measures can score the same pair differently. The resolver folds
//! them into one value with a configurable [`ConflictStrategy`] and offers
//! descriptive statistics to judge how much the measures disagree.

use serde::{Deserialize, Serialize};

use crate::error::{Severity, Warning, WarningKind};

/// Score range above which [`ConflictResolver::has_significant_conflict`]
/// reports disagreement by default.
pub const DEFAULT_CONFLICT_THRESHOLD: f64 = 0.3;

/// Standard deviation above which weighted averaging is recommended.
const RECOMMENDATION_STD_DEV: f64 = 0.4;

/// How multiple scores for one pair are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    Average,
    #[default]
    WeightedAverage,
    Max,
    Min,
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" => Ok(ConflictStrategy::Average),
            "weighted-average" | "weightedAverage" => Ok(ConflictStrategy::WeightedAverage),
            "max" => Ok(ConflictStrategy::Max),
            "min" => Ok(ConflictStrategy::Min),
            other => Err(format!("unknown conflict strategy `{other}`")),
        }
    }
}

/// A resolved score plus any configuration fallback that was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: f64,
    pub warning: Option<Warning>,
}

/// Descriptive statistics over a score set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStatistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Population variance.
    pub variance: f64,
    pub standard_deviation: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

/// Combines multiple similarity scores for the same pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `scores` into one value.
    ///
    /// Missing weights count as 1.0 and negative or non-finite weights as 0.
    /// A single score is returned unchanged whatever the strategy.
    pub fn resolve_conflicts(&self, scores: &[f64], weights: &[f64], strategy: ConflictStrategy) -> f64 {
        let resolution = self.resolve(scores, weights, strategy);
        if let Some(warning) = &resolution.warning {
            tracing::warn!(?strategy, %warning, "conflict resolution fell back");
        }
        resolution.value
    }

    /// Like [`ConflictResolver::resolve_conflicts`], returning the fallback
    /// warning instead of only logging it.
    pub fn resolve(&self, scores: &[f64], weights: &[f64], strategy: ConflictStrategy) -> Resolution {
        match scores {
            [] => {
                return Resolution {
                    value: 0.0,
                    warning: Some(Warning::new(
                        WarningKind::Configuration,
                        Severity::Low,
                        "no scores to resolve, using 0",
                    )),
                };
            }
            [single] => {
                return Resolution {
                    value: *single,
                    warning: None,
                };
            }
            _ => {}
        }

        let value = match strategy {
            ConflictStrategy::Average => scores.iter().sum::<f64>() / scores.len() as f64,
            ConflictStrategy::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ConflictStrategy::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
            ConflictStrategy::WeightedAverage => {
                let mut total_weight = 0.0;
                let mut weighted = 0.0;
                for (i, score) in scores.iter().enumerate() {
                    let w = weights.get(i).copied().unwrap_or(1.0);
                    let w = if w.is_finite() && w > 0.0 { w } else { 0.0 };
                    total_weight += w;
                    weighted += score * w;
                }
                if total_weight <= 0.0 {
                    return Resolution {
                        value: 0.0,
                        warning: Some(Warning::new(
                            WarningKind::Configuration,
                            Severity::Medium,
                            "weighted average with zero total weight, using 0",
                        )),
                    };
                }
                weighted / total_weight
            }
        };

        Resolution { value, warning: None }
    }

    pub fn get_conflict_statistics(&self, scores: &[f64]) -> ConflictStatistics {
        if scores.is_empty() {
            return ConflictStatistics::default();
        }

        let count = scores.len();
        let mean = scores.iter().sum::<f64>() / count as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;

        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let min = sorted[0];
        let max = sorted[count - 1];

        ConflictStatistics {
            count,
            mean,
            median,
            variance,
            standard_deviation: variance.sqrt(),
            min,
            max,
            range: max - min,
        }
    }

    /// True when the spread (max - min) of `scores` exceeds `threshold`.
    pub fn has_significant_conflict(&self, scores: &[f64], threshold: f64) -> bool {
        scores.len() > 1 && self.get_conflict_statistics(scores).range > threshold
    }

    /// Weighted averaging for widely spread scores, plain averaging otherwise.
    pub fn get_recommended_strategy(&self, scores: &[f64]) -> ConflictStrategy {
        if self.get_conflict_statistics(scores).standard_deviation > RECOMMENDATION_STD_DEV {
            ConflictStrategy::WeightedAverage
        } else {
            ConflictStrategy::Average
        }
    }
}
