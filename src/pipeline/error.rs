//! Pipeline-specific error types.

use crate::pipeline::id::{PortDirection, PortId, StageId};
use std::fmt;
use thiserror::Error;

/// Framework faults raised while declaring, validating or running a pipeline.
///
/// [`PipelineError::Terminate`] is not a fault: it is the cancellation signal
/// that unwinds a stage's execution turn once the execution is being torn down.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Execution terminated")]
    Terminate,

    #[error("Invalid configuration:\n{0}")]
    InvalidConfiguration(ValidationReport),

    #[error("Stage {stage}: illegal state change from {from} to {to}")]
    IllegalStateChange {
        stage: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Stage {stage}: overridden {hook} did not call the base hook")]
    SuperNotCalled { stage: String, hook: &'static str },

    #[error("Stage {0}: only producers may signal that their work is completed")]
    WorkCompletedByConsumer(String),

    #[error("Single-element pipe into {0:?} is already occupied")]
    SlotOccupied(PortId),

    #[error("Unknown port {0:?}")]
    UnknownPort(PortId),

    #[error("Unknown stage {0:?}")]
    UnknownStage(StageId),

    #[error("Port {port:?} received an element that is not a {expected}")]
    ElementType { port: PortId, expected: &'static str },

    #[error("Port {0:?} is already connected")]
    PortAlreadyConnected(PortId),

    #[error("Port index {index} of {stage:?} does not fit into a port id")]
    PortIdOutOfRange { stage: StageId, index: u16 },

    #[error("Stage {stage}: all {max} {direction:?} port indices are in use")]
    PortLimitReached {
        stage: String,
        direction: PortDirection,
        max: u16,
    },

    #[error("Stage {stage}: {hook} failed: {message}")]
    Hook {
        stage: String,
        hook: &'static str,
        message: String,
    },

    #[error("Thread of stage {stage} panicked: {message}")]
    ThreadPanicked { stage: String, message: String },

    #[error("Execution failed:\n{}", .0.join("\n"))]
    ExecutionFailed(Vec<String>),

    #[error("Service {name} failed: {message}")]
    Service { name: String, message: String },
}

impl PipelineError {
    /// Whether this error is the cancellation signal rather than a fault.
    pub fn is_terminate(&self) -> bool {
        matches!(self, PipelineError::Terminate)
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// A single problem found while validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    InvalidPortConnection {
        source: PortId,
        target: PortId,
        source_type: &'static str,
        target_type: &'static str,
    },
    CrossingThreads {
        stage: String,
        owners: Vec<String>,
    },
    UnreachableStage {
        stage: String,
    },
}

impl ValidationIssue {
    /// Warnings are reported but never reject a configuration.
    pub fn is_warning(&self) -> bool {
        matches!(self, ValidationIssue::UnreachableStage { .. })
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::InvalidPortConnection {
                source,
                target,
                source_type,
                target_type,
            } => write!(
                f,
                "cannot connect {source:?} ({source_type}) to {target:?} ({target_type})"
            ),
            ValidationIssue::CrossingThreads { stage, owners } => write!(
                f,
                "passive stage {stage} is reachable from the threads of {}",
                owners.join(", ")
            ),
            ValidationIssue::UnreachableStage { stage } => {
                write!(f, "stage {stage} is not reachable from any active stage")
            }
        }
    }
}

/// Every issue found by one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| !issue.is_warning())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.is_warning())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.errors().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {issue}")?;
        }
        Ok(())
    }
}
