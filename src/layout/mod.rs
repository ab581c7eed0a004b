//! Force-directed layout with optional similarity clustering.
//!
//! This module computes node positions on the CPU. The positions feed the
//! spatial index build and can be uploaded to renderers as they are.

mod clustering;
mod config;
mod engine;
mod simulation;

pub use clustering::ClusterSummary;
pub use config::{ClusteringConfig, ForceConfig, LayoutConfig, MAX_SUPPORTED_NODES, PerformanceConfig};
pub use engine::{
    Capabilities, LayoutEngine, LayoutProgress, LayoutResult, LayoutState, PerformanceMetrics, SnapshotEntry,
    estimate_memory_bytes,
};
pub use simulation::initial_position;
