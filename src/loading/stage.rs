//! Loading stages and their explicit state machine.
//!
//! Transitions:
//! - `Pending -> Running` (dependencies checked by the manager)
//! - `Running <-> Paused`
//! - `Running -> Complete | Errored`
//! - `Pending | Running | Paused -> Cancelled`
//!
//! Anything else is an [`Error::InvalidTransition`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Warning};
use crate::graph::{ClusterId, NodeId, Point};
use crate::layout::ClusterSummary;
use crate::spatial::IndexStatistics;

/// The fixed pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    NodePositioning,
    Clustering,
    EdgeCalculation,
    RenderingReady,
}

impl StageName {
    /// Stages in execution order.
    pub const ALL: [StageName; 4] = [
        StageName::NodePositioning,
        StageName::Clustering,
        StageName::EdgeCalculation,
        StageName::RenderingReady,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::NodePositioning => "node-positioning",
            StageName::Clustering => "clustering",
            StageName::EdgeCalculation => "edge-calculation",
            StageName::RenderingReady => "rendering-ready",
        }
    }

    /// Stages that must be complete before this one may start.
    pub fn dependencies(self) -> &'static [StageName] {
        match self {
            StageName::NodePositioning => &[],
            StageName::Clustering | StageName::EdgeCalculation => &[StageName::NodePositioning],
            StageName::RenderingReady => &[StageName::Clustering, StageName::EdgeCalculation],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StageName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::UnknownStage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageStatus {
    Pending,
    Running,
    Paused,
    Complete,
    Cancelled,
    Errored,
}

impl StageStatus {
    /// True once the stage can no longer change within a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Complete | StageStatus::Cancelled | StageStatus::Errored)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Paused => "paused",
            StageStatus::Complete => "complete",
            StageStatus::Cancelled => "cancelled",
            StageStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Geometry of one drawable edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeGeometry {
    pub source: NodeId,
    pub target: NodeId,
    pub from: Point,
    pub to: Point,
    pub length: f64,
    pub weight: f64,
}

/// Everything a renderer needs once the pipeline is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSnapshot {
    pub positions: HashMap<NodeId, Point>,
    pub clusters: HashMap<NodeId, ClusterId>,
    pub edge_count: usize,
    pub index_statistics: IndexStatistics,
}

/// Payload published when a stage completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum StageOutput {
    Positions(HashMap<NodeId, Point>),
    Clusters {
        assignments: HashMap<NodeId, ClusterId>,
        summaries: Vec<ClusterSummary>,
    },
    Edges(Vec<EdgeGeometry>),
    RenderingReady(RenderSnapshot),
}

impl StageOutput {
    /// Approximate heap footprint, used for memory budgeting.
    pub fn memory_estimate(&self) -> usize {
        let entry = size_of::<NodeId>() + size_of::<Point>();
        match self {
            StageOutput::Positions(positions) => positions.len() * entry,
            StageOutput::Clusters { assignments, summaries } => {
                assignments.len() * (size_of::<NodeId>() + size_of::<ClusterId>())
                    + summaries.iter().map(|s| size_of::<ClusterSummary>() + s.members.len() * size_of::<NodeId>()).sum::<usize>()
            }
            StageOutput::Edges(edges) => edges.len() * size_of::<EdgeGeometry>(),
            StageOutput::RenderingReady(snapshot) => {
                snapshot.positions.len() * entry + snapshot.clusters.len() * (size_of::<NodeId>() + size_of::<ClusterId>())
            }
        }
    }
}

/// One stage of a progressive load.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingStage {
    pub name: StageName,
    pub status: StageStatus,
    /// 0 to 100.
    pub progress: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    #[serde(skip)]
    pub output: Option<Arc<StageOutput>>,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
}

impl LoadingStage {
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            progress: 0.0,
            started_at: None,
            completed_at: None,
            output: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn dependencies(&self) -> &'static [StageName] {
        self.name.dependencies()
    }

    /// Back to `Pending` with no output.
    pub fn reset(&mut self) {
        *self = Self::new(self.name);
    }

    fn transition(&mut self, allowed: &[StageStatus], to: StageStatus) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(Error::InvalidTransition {
                stage: self.name,
                from: self.status,
                to,
            });
        }
        tracing::debug!(stage = %self.name, from = %self.status, %to, "stage transition");
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self, now_ms: f64) -> Result<()> {
        self.transition(&[StageStatus::Pending], StageStatus::Running)?;
        self.started_at = Some(now_ms);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(&[StageStatus::Running], StageStatus::Paused)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(&[StageStatus::Paused], StageStatus::Running)
    }

    pub fn complete(&mut self, output: StageOutput, now_ms: f64) -> Result<Arc<StageOutput>> {
        self.transition(&[StageStatus::Running], StageStatus::Complete)?;
        self.progress = 100.0;
        self.completed_at = Some(now_ms);
        let output = Arc::new(output);
        self.output = Some(output.clone());
        Ok(output)
    }

    pub fn cancel(&mut self, now_ms: f64) -> Result<()> {
        self.transition(
            &[StageStatus::Pending, StageStatus::Running, StageStatus::Paused],
            StageStatus::Cancelled,
        )?;
        self.completed_at = Some(now_ms);
        Ok(())
    }

    pub fn fail(&mut self, error: &Error, now_ms: f64) -> Result<()> {
        self.transition(&[StageStatus::Running, StageStatus::Paused], StageStatus::Errored)?;
        self.error = Some(error.to_string());
        self.completed_at = Some(now_ms);
        Ok(())
    }

    /// Clamp and store progress while running.
    pub fn set_progress(&mut self, progress: f64) {
        if matches!(self.status, StageStatus::Running | StageStatus::Paused) && progress.is_finite() {
            self.progress = progress.clamp(0.0, 100.0);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == StageStatus::Complete
    }

    /// Time spent so far, or in total once finished.
    pub fn elapsed_ms(&self, now_ms: f64) -> Option<f64> {
        self.started_at
            .map(|start| self.completed_at.unwrap_or(now_ms) - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(StageName::EdgeCalculation.to_string(), "edge-calculation");
        assert_eq!("rendering-ready".parse::<StageName>().unwrap(), StageName::RenderingReady);
        assert!(matches!("drawing".parse::<StageName>(), Err(Error::UnknownStage(_))));
        assert_eq!(
            serde_json::to_string(&StageName::NodePositioning).unwrap(),
            "\"node-positioning\""
        );
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        for (i, name) in StageName::ALL.iter().enumerate() {
            for dep in name.dependencies() {
                let position = StageName::ALL.iter().position(|n| n == dep).unwrap();
                assert!(position < i);
            }
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut stage = LoadingStage::new(StageName::Clustering);
        stage.start(10.0).unwrap();
        stage.set_progress(150.0);
        assert_eq!(stage.progress, 100.0);
        stage.set_progress(40.0);
        stage.pause().unwrap();
        assert_eq!(stage.status, StageStatus::Paused);
        stage.resume().unwrap();
        let output = stage.complete(StageOutput::Edges(Vec::new()), 25.0).unwrap();
        assert!(matches!(*output, StageOutput::Edges(_)));
        assert!(stage.is_complete());
        assert_eq!(stage.progress, 100.0);
        assert_eq!(stage.elapsed_ms(99.0), Some(15.0));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut stage = LoadingStage::new(StageName::NodePositioning);
        assert!(matches!(
            stage.complete(StageOutput::Positions(HashMap::new()), 0.0),
            Err(Error::InvalidTransition {
                from: StageStatus::Pending,
                to: StageStatus::Complete,
                ..
            })
        ));
        assert!(stage.pause().is_err());
        stage.cancel(1.0).unwrap();
        assert!(stage.cancel(2.0).is_err());
        assert!(stage.start(3.0).is_err());
        stage.reset();
        assert_eq!(stage.status, StageStatus::Pending);
        assert!(stage.output.is_none());
    }

    #[test]
    fn test_failure_records_error() {
        let mut stage = LoadingStage::new(StageName::EdgeCalculation);
        stage.start(0.0).unwrap();
        stage.fail(&Error::NotReady("boom".into()), 1.0).unwrap();
        assert_eq!(stage.status, StageStatus::Errored);
        assert!(stage.error.as_deref().unwrap().contains("boom"));
        assert!(stage.status.is_terminal());
    }
}
