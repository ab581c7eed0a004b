//! Similarity measure and compatibility function definitions.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::graph::Node;

use super::context::ClusteringContext;

/// Pure pairwise scoring function.
pub type ScoreFn =
    Arc<dyn Fn(&Node, &Node, &ClusteringContext) -> Result<f64, MeasureError> + Send + Sync>;

/// Pairwise predicate from the compatibility namespace.
pub type CompatibilityFn = Arc<dyn Fn(&Node, &Node) -> bool + Send + Sync>;

/// A runtime-registered similarity measure.
///
/// Build one with [`SimilarityMeasure::new`] and the builder methods; the
/// registry checks that every descriptive field and the scorer are present.
#[derive(Clone, Default)]
pub struct SimilarityMeasure {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    /// JSON schema of the parameters the scorer reads from
    /// [`ClusteringContext::parameters`].
    pub config_schema: serde_json::Value,
    pub categories: Vec<String>,
    scorer: Option<ScoreFn>,
}

impl SimilarityMeasure {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn schema(mut self, schema: serde_json::Value) -> Self {
        self.config_schema = schema;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn scorer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Node, &Node, &ClusteringContext) -> Result<f64, MeasureError> + Send + Sync + 'static,
    {
        self.scorer = Some(Arc::new(f));
        self
    }

    /// Infallible scorer convenience.
    pub fn scorer_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Node, &Node, &ClusteringContext) -> f64 + Send + Sync + 'static,
    {
        self.scorer(move |a, b, ctx| Ok(f(a, b, ctx)))
    }

    pub fn has_scorer(&self) -> bool {
        self.scorer.is_some()
    }

    /// Invoke the scorer. Panics inside the scorer become
    /// [`MeasureError::Panicked`].
    pub fn score(&self, a: &Node, b: &Node, ctx: &ClusteringContext) -> Result<f64, MeasureError> {
        let scorer = self
            .scorer
            .as_ref()
            .ok_or_else(|| MeasureError::Failed("measure has no scoring function".into()))?;
        match panic::catch_unwind(AssertUnwindSafe(|| scorer(a, b, ctx))) {
            Ok(result) => result,
            Err(payload) => Err(MeasureError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    pub fn info(&self) -> MeasureInfo {
        MeasureInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            categories: self.categories.clone(),
            config_schema: self.config_schema.clone(),
        }
    }
}

impl fmt::Debug for SimilarityMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimilarityMeasure")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("categories", &self.categories)
            .field("has_scorer", &self.scorer.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Serializable description of a registered measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub categories: Vec<String>,
    pub config_schema: serde_json::Value,
}

/// A function from the compatibility namespace, unrelated to similarity
/// scoring (e.g. whether two nodes may share an edge style).
#[derive(Clone)]
pub struct CompatibilityFunction {
    pub id: String,
    pub name: String,
    check: CompatibilityFn,
}

impl CompatibilityFunction {
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Node, &Node) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn check(&self, a: &Node, b: &Node) -> bool {
        (self.check)(a, b)
    }
}

impl fmt::Debug for CompatibilityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompatibilityFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
