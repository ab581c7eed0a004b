//! Progressive loading pipeline.
//!
//! Large graphs are delivered in stages so that rendering can begin before
//! the whole pipeline is finished. Each stage publishes its output as soon
//! as it completes; dependents start only after their dependencies.

mod config;
mod events;
mod manager;
mod stage;

pub use config::{LoadingConfig, StageWeights};
pub use events::{LoadingEvent, ProgressUpdate};
pub use manager::{LoadingHandle, LoadingReport, ProgressiveLoadingManager};
pub use stage::{EdgeGeometry, LoadingStage, RenderSnapshot, StageName, StageOutput, StageStatus};
