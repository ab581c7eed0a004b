//! Layout configuration.
//!
//! Every struct accepts partial JSON objects: missing fields take their
//! defaults. Defaults follow the classic d3-force parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{Dimensions, Metadata, Point};
use crate::similarity::ConflictStrategy;
use crate::similarity::builtin::{ATTRIBUTE_MATCH, METADATA_JACCARD};

/// Hard ceiling on the node count of a single run.
pub const MAX_SUPPORTED_NODES: usize = 100_000;

/// Force parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForceConfig {
    /// Point the centre force keeps the layout's mean position on.
    pub center: Point,
    /// Fraction of the centring offset applied per iteration (0 disables).
    pub center_strength: f64,
    /// Negative values repel.
    pub charge_strength: f64,
    /// Pairs further apart than this ignore each other. `None` is unbounded.
    pub charge_distance_max: Option<f64>,
    /// Lower bound on the distance used by the charge force.
    pub distance_min: f64,
    /// Rest length of a link.
    pub link_distance: f64,
    /// Link stiffness. `None` uses `1 / min(degree(source), degree(target))`.
    pub link_strength: Option<f64>,
    /// Node radius for collision (0 disables).
    pub collision_radius: f64,
    pub collision_strength: f64,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            center: Point::ORIGIN,
            center_strength: 1.0,
            charge_strength: -30.0,
            charge_distance_max: None,
            distance_min: 1.0,
            link_distance: 30.0,
            link_strength: None,
            collision_radius: 5.0,
            collision_strength: 0.7,
        }
    }
}

/// Similarity clustering during stabilization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusteringConfig {
    pub enabled: bool,
    /// Registered measures consulted for each candidate pair.
    pub measure_ids: Vec<String>,
    /// Per-measure weights; missing entries weigh 1.0.
    pub weights: HashMap<String, f64>,
    pub strategy: ConflictStrategy,
    /// Minimum resolved similarity for a merge.
    pub similarity_threshold: f64,
    /// Largest cluster a merge may produce.
    pub max_cluster_size: usize,
    /// Pull of members toward their cluster centroid.
    pub cluster_attraction: f64,
    /// Minimum distance kept between cluster centroids.
    pub cluster_separation: f64,
    /// Iterations between clustering checkpoints.
    pub checkpoint_interval: usize,
    /// Nodes within this distance are merge candidates in addition to
    /// graph neighbours.
    pub candidate_radius: f64,
    /// Parameters handed to measures through the clustering context.
    pub parameters: Metadata,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            measure_ids: vec![METADATA_JACCARD.to_string(), ATTRIBUTE_MATCH.to_string()],
            weights: HashMap::new(),
            strategy: ConflictStrategy::WeightedAverage,
            similarity_threshold: 0.7,
            max_cluster_size: 50,
            cluster_attraction: 0.1,
            cluster_separation: 120.0,
            checkpoint_interval: 50,
            candidate_radius: 60.0,
            parameters: Metadata::new(),
        }
    }
}

/// Limits that keep a run responsive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceConfig {
    /// Inputs above this size are rejected.
    pub max_nodes: usize,
    /// Iterations between cooperative yields.
    pub yield_interval: usize,
    /// Iterations between progress callbacks.
    pub progress_interval: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_nodes: 10_000,
            yield_interval: 10,
            progress_interval: 10,
        }
    }
}

/// Full layout configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    pub dimensions: Dimensions,
    pub forces: ForceConfig,
    pub clustering: ClusteringConfig,
    /// Starting simulation energy.
    pub alpha: f64,
    /// Energy below which the run counts as settled.
    pub alpha_min: f64,
    pub alpha_decay: f64,
    /// Fraction of velocity lost per iteration.
    pub velocity_decay: f64,
    pub max_iterations: usize,
    /// Mean per-node displacement below which the layout is stable.
    pub stability_threshold: f64,
    pub performance: PerformanceConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::Two,
            forces: ForceConfig::default(),
            clustering: ClusteringConfig::default(),
            alpha: 1.0,
            alpha_min: 0.001,
            // Reaches alpha_min after ~300 iterations.
            alpha_decay: 1.0 - 0.001f64.powf(1.0 / 300.0),
            velocity_decay: 0.4,
            max_iterations: 300,
            stability_threshold: 0.01,
            performance: PerformanceConfig::default(),
        }
    }
}

impl LayoutConfig {
    /// Coarser settings for graphs in the tens of thousands of nodes.
    pub fn large_graph() -> Self {
        Self {
            forces: ForceConfig {
                charge_distance_max: Some(400.0),
                collision_radius: 0.0,
                ..ForceConfig::default()
            },
            alpha_decay: 1.0 - 0.001f64.powf(1.0 / 150.0),
            max_iterations: 150,
            stability_threshold: 0.05,
            performance: PerformanceConfig {
                max_nodes: MAX_SUPPORTED_NODES,
                yield_interval: 2,
                progress_interval: 5,
            },
            ..Self::default()
        }
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return invalid(format!("alpha must be positive, got {}", self.alpha));
        }
        if !(self.alpha_min.is_finite() && self.alpha_min >= 0.0) {
            return invalid(format!("alphaMin must be non-negative, got {}", self.alpha_min));
        }
        if !(0.0..1.0).contains(&self.alpha_decay) {
            return invalid(format!("alphaDecay must be in [0, 1), got {}", self.alpha_decay));
        }
        if !(0.0..=1.0).contains(&self.velocity_decay) {
            return invalid(format!("velocityDecay must be in [0, 1], got {}", self.velocity_decay));
        }
        if self.max_iterations == 0 {
            return invalid("maxIterations must be at least 1".into());
        }
        if !(self.stability_threshold.is_finite() && self.stability_threshold >= 0.0) {
            return invalid(format!(
                "stabilityThreshold must be non-negative, got {}",
                self.stability_threshold
            ));
        }

        let f = &self.forces;
        if !f.center.is_finite() {
            return invalid("center must be finite".into());
        }
        for (name, value) in [
            ("centerStrength", f.center_strength),
            ("distanceMin", f.distance_min),
            ("linkDistance", f.link_distance),
            ("collisionRadius", f.collision_radius),
            ("collisionStrength", f.collision_strength),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        if !f.charge_strength.is_finite() {
            return invalid("chargeStrength must be finite".into());
        }
        if let Some(max) = f.charge_distance_max {
            if max.is_nan() || max <= 0.0 {
                return invalid(format!("chargeDistanceMax must be positive, got {max}"));
            }
        }
        if let Some(strength) = f.link_strength {
            if !(strength.is_finite() && strength >= 0.0) {
                return invalid(format!("linkStrength must be non-negative, got {strength}"));
            }
        }

        let c = &self.clustering;
        if c.enabled {
            if !(0.0..=1.0).contains(&c.similarity_threshold) {
                return invalid(format!(
                    "similarityThreshold must be in [0, 1], got {}",
                    c.similarity_threshold
                ));
            }
            if c.max_cluster_size < 2 {
                return invalid("maxClusterSize must be at least 2".into());
            }
            if c.checkpoint_interval == 0 {
                return invalid("checkpointInterval must be at least 1".into());
            }
            for (name, value) in [
                ("clusterAttraction", c.cluster_attraction),
                ("clusterSeparation", c.cluster_separation),
                ("candidateRadius", c.candidate_radius),
            ] {
                if !(value.is_finite() && value >= 0.0) {
                    return invalid(format!("{name} must be non-negative, got {value}"));
                }
            }
        }

        if self.performance.max_nodes == 0 || self.performance.max_nodes > MAX_SUPPORTED_NODES {
            return invalid(format!(
                "maxNodes must be in 1..={MAX_SUPPORTED_NODES}, got {}",
                self.performance.max_nodes
            ));
        }
        if self.performance.yield_interval == 0 || self.performance.progress_interval == 0 {
            return invalid("yieldInterval and progressInterval must be at least 1".into());
        }
        Ok(())
    }
}
