//! Progressive loading configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::LayoutConfig;
use crate::spatial::SpatialIndexConfig;

use super::stage::StageName;

/// Share of the total work attributed to each stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StageWeights {
    pub node_positioning: f64,
    pub clustering: f64,
    pub edge_calculation: f64,
    pub rendering_ready: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            node_positioning: 0.6,
            clustering: 0.15,
            edge_calculation: 0.15,
            rendering_ready: 0.1,
        }
    }
}

impl StageWeights {
    pub fn weight(&self, stage: StageName) -> f64 {
        match stage {
            StageName::NodePositioning => self.node_positioning,
            StageName::Clustering => self.clustering,
            StageName::EdgeCalculation => self.edge_calculation,
            StageName::RenderingReady => self.rendering_ready,
        }
    }

    pub fn total(&self) -> f64 {
        StageName::ALL.iter().map(|s| self.weight(*s)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadingConfig {
    /// Items processed between cooperative checkpoints.
    pub batch_size: usize,
    /// Memory ceiling in bytes. Crossing `memory_warning_ratio` of it records
    /// one high-severity warning per run.
    pub max_memory_usage: usize,
    pub memory_warning_ratio: f64,
    pub stage_weights: StageWeights,
    /// Reported by the completion estimate before any progress is observed.
    pub default_estimate_ms: f64,
    pub layout: LayoutConfig,
    pub index: SpatialIndexConfig,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_memory_usage: 512 * 1024 * 1024,
            memory_warning_ratio: 0.9,
            stage_weights: StageWeights::default(),
            default_estimate_ms: 5000.0,
            layout: LayoutConfig::default(),
            index: SpatialIndexConfig::default(),
        }
    }
}

impl LoadingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batchSize must be at least 1".into()));
        }
        if self.max_memory_usage == 0 {
            return Err(Error::InvalidConfig("maxMemoryUsage must be positive".into()));
        }
        if !(self.memory_warning_ratio > 0.0 && self.memory_warning_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "memoryWarningRatio must be in (0, 1], got {}",
                self.memory_warning_ratio
            )));
        }
        for stage in StageName::ALL {
            let weight = self.stage_weights.weight(stage);
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(Error::InvalidConfig(format!("weight of stage {stage} must be non-negative")));
            }
        }
        if self.stage_weights.total() <= 0.0 {
            return Err(Error::InvalidConfig("stage weights sum to zero".into()));
        }
        if !(self.default_estimate_ms.is_finite() && self.default_estimate_ms >= 0.0) {
            return Err(Error::InvalidConfig("defaultEstimateMs must be non-negative".into()));
        }
        self.layout.validate()?;
        self.index.validate()
    }
}
