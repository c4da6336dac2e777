//! Configuration module for stagepipe
//!
//! This module handles engine configuration including:
//! - Execution settings shared by every pipeline (pipe capacities, queue
//!   flavour, exception handling)
//! - Task-farm adaptation settings
//! - The default logging filter of the demo binary
//!
//! Configuration files are TOML. Every field is optional and falls back to
//! the defaults defined below.
//!
//! # Example
//!
//! ```no_run
//! use stagepipe::config::EngineConfig;
//!
//! let config = EngineConfig::load("stagepipe.toml")?;
//! println!("{}", config.execution.default_pipe_capacity);
//! # Ok::<(), stagepipe::error::EngineError>(())
//! ```

use crate::error::{EngineError, Result, ResultExt};
use crate::pipeline::exception::ExceptionPolicy;
use crate::pipeline::pipe::SynchedPipeKind;
use crate::taskfarm::config::TaskFarmConfiguration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Capacity of a pipe connected without an explicit capacity
pub const DEFAULT_PIPE_CAPACITY: usize = 512;

/// Pause between two insert attempts into a full bounded pipe
pub const DEFAULT_SLEEP_IF_FULL_MS: u64 = 10;

/// How long a stage waits for `Starting` before re-checking for an abort
pub const DEFAULT_START_SIGNAL_POLL_MS: u64 = 50;

/// Number of exceptions retained for the execution report
pub const DEFAULT_EXCEPTION_LOG_CAPACITY: usize = 1024;

/// Logging filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info";

// ==================== Execution ====================

/// Settings applied to one pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Capacity of connections declared without one
    pub default_pipe_capacity: usize,

    /// Queue used between stages running on different threads
    pub synched_pipe: SynchedPipeKind,

    /// Sleep between insert attempts into a full SPSC pipe
    pub sleep_if_full_ms: u64,

    /// Poll interval while waiting for the `Starting` signal
    pub start_signal_poll_ms: u64,

    /// Keep reported stage exceptions for the execution report
    pub log_exceptions: bool,

    /// Maximum number of retained exceptions
    pub exception_log_capacity: usize,

    /// Verdict for exceptions when no listener is registered
    pub exception_policy: ExceptionPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_pipe_capacity: DEFAULT_PIPE_CAPACITY,
            synched_pipe: SynchedPipeKind::default(),
            sleep_if_full_ms: DEFAULT_SLEEP_IF_FULL_MS,
            start_signal_poll_ms: DEFAULT_START_SIGNAL_POLL_MS,
            log_exceptions: true,
            exception_log_capacity: DEFAULT_EXCEPTION_LOG_CAPACITY,
            exception_policy: ExceptionPolicy::default(),
        }
    }
}

impl ExecutionConfig {
    /// Collect every invalid setting
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.default_pipe_capacity == 0 {
            problems.push("execution.default_pipe_capacity must be at least 1".to_string());
        }
        if self.start_signal_poll_ms == 0 {
            problems.push("execution.start_signal_poll_ms must be at least 1".to_string());
        }
        problems
    }
}

// ==================== Logging ====================

/// Logging settings of the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

// ==================== Engine ====================

/// Complete configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub task_farm: TaskFarmConfiguration,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(EngineError::from)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config {:?}", path))
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        std::fs::write(path, content)
            .map_err(EngineError::from)
            .with_context(|| format!("Failed to write config {:?}", path))
    }

    /// Check every section, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = self.execution.problems();
        problems.extend(self.task_farm.problems());
        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.execution.default_pipe_capacity, DEFAULT_PIPE_CAPACITY);
        assert_eq!(config.execution.synched_pipe, SynchedPipeKind::Spsc);
        assert_eq!(config.execution.exception_policy, ExceptionPolicy::Terminate);
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.task_farm.analysis_window, 5);
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [execution]
            synched_pipe = "mpmc"
            exception_policy = "continue"

            [task_farm]
            throughput_algorithm = "MeanAlgorithm"
            "#,
        )
        .unwrap();
        assert_eq!(config.execution.synched_pipe, SynchedPipeKind::Mpmc);
        assert_eq!(config.execution.exception_policy, ExceptionPolicy::Continue);
        assert_eq!(config.execution.sleep_if_full_ms, DEFAULT_SLEEP_IF_FULL_MS);
        assert_eq!(config.task_farm.throughput_algorithm, "MeanAlgorithm");
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let err = EngineConfig::from_toml_str(
            r#"
            [execution]
            default_pipe_capacity = 0

            [task_farm]
            analysis_window = 1
            pipe_capacity = 0
            "#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("default_pipe_capacity"));
        assert!(message.contains("analysis_window"));
        assert!(message.contains("pipe_capacity"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.execution.default_pipe_capacity = 64;
        config.task_farm.monitoring_enabled = true;
        config.logging.filter = "stagepipe=debug".to_string();
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.execution.default_pipe_capacity, 64);
        assert!(loaded.task_farm.monitoring_enabled);
        assert_eq!(loaded.logging.filter, "stagepipe=debug");
    }

    #[test]
    fn test_missing_file_has_context() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
