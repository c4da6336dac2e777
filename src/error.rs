//! Error handling for stagepipe
//!
//! Framework faults live in [`PipelineError`] and task-farm faults in
//! [`TaskFarmError`]; this module wraps both together with configuration
//! and I/O failures for the binary and other top-level callers.

use crate::pipeline::error::PipelineError;
use crate::taskfarm::error::TaskFarmError;
use thiserror::Error;

/// Main error type for stagepipe operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Errors raised while validating or running a pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to task-farm setup or adaptation
    #[error("Task farm error: {0}")]
    TaskFarm(#[from] TaskFarmError),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration files
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Configuration serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for stagepipe operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EngineError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Config("pipe capacity must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: pipe capacity must be at least 1"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = EngineError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load");
        assert!(with_ctx.to_string().starts_with("Failed to load"));
    }

    #[test]
    fn test_pipeline_result_context() {
        let result: std::result::Result<(), PipelineError> = Err(PipelineError::Terminate);
        let err = result.context("Running farm").unwrap_err();
        assert!(matches!(
            err,
            EngineError::WithContext { ref source, .. }
                if matches!(**source, EngineError::Pipeline(PipelineError::Terminate))
        ));
    }
}
