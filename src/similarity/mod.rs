//! Pairwise similarity scoring for clustering.
//!
//! - [`SimilarityFunctionRegistry`]: validated, runtime-registered measures
//! - [`ConflictResolver`]: folds disagreeing scores into one value
//! - [`ClusteringContext`]: state a measure may consult while scoring
//! - [`builtin`]: ready-made measures registered on demand

pub mod builtin;
mod context;
mod measure;
mod registry;
mod resolver;

pub use builtin::register_builtin_measures;
pub use context::{ClusteringContext, PerformanceCounters};
pub use measure::{CompatibilityFn, CompatibilityFunction, MeasureInfo, ScoreFn, SimilarityMeasure};
pub use registry::{
    MeasureFailure, MeasureScore, RegistrationReport, SimilarityBreakdown, SimilarityFunctionRegistry,
    ValidationPolicy,
};
pub use resolver::{
    ConflictResolver, ConflictStatistics, ConflictStrategy, DEFAULT_CONFLICT_THRESHOLD, Resolution,
};
