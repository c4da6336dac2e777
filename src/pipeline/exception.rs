//! Routing of operational stage failures.
//!
//! An error returned from a stage's `execute` that is not a framework fault is
//! handed to the configured [`ExceptionListener`], whose verdict decides
//! whether the execution continues.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Verdict of an exception listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FurtherExecution {
    Continue,
    Terminate,
}

/// Decides how to proceed after a stage failed.
#[cfg_attr(test, mockall::automock)]
pub trait ExceptionListener: Send + Sync {
    fn on_stage_exception(&self, error: &anyhow::Error, stage: &str) -> FurtherExecution;
}

/// Terminates the whole execution on the first failure.
#[derive(Debug, Default)]
pub struct TerminatingExceptionListener;

impl ExceptionListener for TerminatingExceptionListener {
    fn on_stage_exception(&self, error: &anyhow::Error, stage: &str) -> FurtherExecution {
        tracing::error!("Stage {} failed, terminating execution: {:#}", stage, error);
        FurtherExecution::Terminate
    }
}

/// Keeps executing after every failure.
#[derive(Debug, Default)]
pub struct IgnoringExceptionListener;

impl ExceptionListener for IgnoringExceptionListener {
    fn on_stage_exception(&self, _error: &anyhow::Error, _stage: &str) -> FurtherExecution {
        FurtherExecution::Continue
    }
}

/// Default listener selected from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionPolicy {
    #[default]
    Terminate,
    Continue,
}

impl ExceptionPolicy {
    pub fn listener(self) -> Arc<dyn ExceptionListener> {
        match self {
            ExceptionPolicy::Terminate => Arc::new(TerminatingExceptionListener),
            ExceptionPolicy::Continue => Arc::new(IgnoringExceptionListener),
        }
    }
}

/// A failure retained in the execution's exception log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedException {
    pub stage: String,
    pub message: String,
}

/// Wraps the listener shared by all stages of one execution.
pub struct ExceptionReporter {
    listener: Arc<dyn ExceptionListener>,
    log_exceptions: bool,
    capacity: usize,
    log: Mutex<VecDeque<LoggedException>>,
}

impl ExceptionReporter {
    pub fn new(listener: Arc<dyn ExceptionListener>, log_exceptions: bool, capacity: usize) -> Self {
        Self {
            listener,
            log_exceptions,
            capacity,
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn report(&self, error: &anyhow::Error, stage: &str) -> FurtherExecution {
        if self.log_exceptions {
            tracing::warn!("Exception in stage {}: {:#}", stage, error);
            if self.capacity > 0 {
                let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
                if log.len() == self.capacity {
                    log.pop_front();
                }
                log.push_back(LoggedException {
                    stage: stage.to_string(),
                    message: format!("{error:#}"),
                });
            }
        }
        self.listener.on_stage_exception(error, stage)
    }

    /// Retained failures, oldest first.
    pub fn logged(&self) -> Vec<LoggedException> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ExceptionReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionReporter")
            .field("log_exceptions", &self.log_exceptions)
            .field("capacity", &self.capacity)
            .finish()
    }
}
