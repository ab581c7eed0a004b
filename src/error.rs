//! Error and warning types shared by every component.
//!
//! Only structural problems are returned as [`Error`]. Recoverable anomalies
//! (clamped positions, memory pressure, zero-weight resolution, failing
//! scoring functions) are reported as [`Warning`] values and logged through
//! `tracing`, so a long-running pipeline can finish with a degraded result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::loading::{StageName, StageStatus};

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid similarity measure `{id}`: {reason}")]
    InvalidMeasure { id: String, reason: String },

    #[error("similarity measure `{0}` is already registered")]
    DuplicateMeasure(String),

    #[error("unknown similarity measure `{0}`")]
    UnknownMeasure(String),

    #[error("similarity measure `{id}` failed: {source}")]
    MeasureFailed {
        id: String,
        #[source]
        source: MeasureError,
    },

    #[error("invalid ray: {0}")]
    InvalidRay(String),

    #[error("graph has {requested} nodes, engine supports at most {max}")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("unknown loading stage `{0}`")]
    UnknownStage(String),

    #[error("stage {stage} cannot start: dependency {dependency} is {status}")]
    DependencyNotMet {
        stage: StageName,
        dependency: StageName,
        status: StageStatus,
    },

    #[error("stage {stage} cannot move from {from} to {to}")]
    InvalidTransition {
        stage: StageName,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("{}", cancelled_message(.stage))]
    Cancelled { stage: Option<StageName> },

    #[error("engine is not ready: {0}")]
    NotReady(String),

    #[error("layout snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

fn cancelled_message(stage: &Option<StageName>) -> String {
    match stage {
        Some(stage) => format!("stage {stage} cancelled"),
        None => "layout run cancelled".to_string(),
    }
}

impl Error {
    /// True for cooperative cancellation, which callers usually treat as a
    /// normal outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by a user-supplied scoring function.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeasureError {
    #[error("{0}")]
    Failed(String),

    #[error("expected a number, got {0}")]
    WrongType(String),

    #[error("scoring function panicked: {0}")]
    Panicked(String),
}

/// Category of a non-fatal anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    /// Non-finite simulation value that was clamped.
    Numeric,
    /// Memory estimate approaching the configured ceiling.
    Resource,
    /// Configuration that fell back to a defined default.
    Configuration,
    /// A scoring function failed and was skipped.
    Runtime,
    /// Registration accepted a function with questionable behaviour.
    Validation,
    /// Input data that was dropped or rewritten.
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A recorded, non-fatal anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Numeric, Severity::Medium, message)
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Input, Severity::Low, message)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.kind, self.severity, self.message)
    }
}
