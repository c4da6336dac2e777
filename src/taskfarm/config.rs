//! Task farm configuration
//!
//! Every field can be set from the `[task_farm]` section of the engine
//! configuration file; missing fields take the defaults below.

use crate::taskfarm::analysis::{self, WeightMethod};
use crate::taskfarm::error::TaskFarmError;
use serde::{Deserialize, Serialize};

/// Pause between two iterations of the adaptation thread
pub const DEFAULT_ADAPTATION_INTERVAL_MS: u64 = 50;

/// Number of previous measurements an analysis looks at
pub const DEFAULT_ANALYSIS_WINDOW: usize = 5;

/// Algorithm used when none is configured
pub const DEFAULT_THROUGHPUT_ALGORITHM: &str = "RegressionAlgorithm";

/// Iterations to wait for an improvement after adding a worker
pub const DEFAULT_MAX_SAMPLES_UNTIL_REMOVE: u32 = 5;

/// Minimum throughput score that counts as an improvement
pub const DEFAULT_THROUGHPUT_SCORE_BOUNDARY: f64 = 0.2;

/// Capacity of every pipe inside the farm
pub const DEFAULT_FARM_PIPE_CAPACITY: usize = 100;

/// Cores left to the rest of the pipeline when sizing the farm
const RESERVED_CORES: usize = 2;

/// Settings of one task farm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFarmConfiguration {
    /// Record pipe and farm measurements (does not affect adaptation)
    pub monitoring_enabled: bool,

    /// Waiting time between adaptation iterations
    pub adaptation_interval_ms: u64,

    /// Measurements used by the throughput algorithm
    pub analysis_window: usize,

    /// Registered name of the throughput algorithm
    pub throughput_algorithm: String,

    /// Weighting used by `WeightedAlgorithm`
    pub weighted_method: WeightMethod,

    /// Iterations to wait for a performance gain after adding a worker
    pub max_samples_until_remove: u32,

    /// Scores above this boundary count as a performance gain
    pub throughput_score_boundary: f64,

    /// Capacity of the pipes between distributor, workers and merger
    pub pipe_capacity: usize,

    /// Upper bound on the number of workers
    pub max_number_of_cores: usize,
}

fn default_max_number_of_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(RESERVED_CORES)
        .max(1)
}

impl Default for TaskFarmConfiguration {
    fn default() -> Self {
        Self {
            monitoring_enabled: false,
            adaptation_interval_ms: DEFAULT_ADAPTATION_INTERVAL_MS,
            analysis_window: DEFAULT_ANALYSIS_WINDOW,
            throughput_algorithm: DEFAULT_THROUGHPUT_ALGORITHM.to_string(),
            weighted_method: WeightMethod::default(),
            max_samples_until_remove: DEFAULT_MAX_SAMPLES_UNTIL_REMOVE,
            throughput_score_boundary: DEFAULT_THROUGHPUT_SCORE_BOUNDARY,
            pipe_capacity: DEFAULT_FARM_PIPE_CAPACITY,
            max_number_of_cores: default_max_number_of_cores(),
        }
    }
}

impl TaskFarmConfiguration {
    /// Collect every invalid setting
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.adaptation_interval_ms == 0 {
            problems.push("task_farm.adaptation_interval_ms must be at least 1".to_string());
        }
        if self.analysis_window < 2 {
            problems.push(format!(
                "task_farm.analysis_window must be at least 2, got {}",
                self.analysis_window
            ));
        }
        if !analysis::is_registered(&self.throughput_algorithm) {
            problems.push(format!(
                "task_farm.throughput_algorithm {:?} is not one of {}",
                self.throughput_algorithm,
                analysis::registered_names().join(", ")
            ));
        }
        if self.max_samples_until_remove == 0 {
            problems.push("task_farm.max_samples_until_remove must be at least 1".to_string());
        }
        if !self.throughput_score_boundary.is_finite() {
            problems.push("task_farm.throughput_score_boundary must be finite".to_string());
        }
        if self.pipe_capacity == 0 {
            problems.push("task_farm.pipe_capacity must be at least 1".to_string());
        }
        if self.max_number_of_cores == 0 {
            problems.push("task_farm.max_number_of_cores must be at least 1".to_string());
        }
        problems
    }

    pub fn validate(&self) -> Result<(), TaskFarmError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(TaskFarmError::InvalidConfiguration(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TaskFarmConfiguration::default();
        assert!(config.validate().is_ok());
        assert!(config.max_number_of_cores >= 1);
        assert_eq!(config.weighted_method, WeightMethod::Exponential);
    }

    #[test]
    fn test_every_problem_is_reported() {
        let config = TaskFarmConfiguration {
            analysis_window: 0,
            throughput_algorithm: "FancyAlgorithm".to_string(),
            pipe_capacity: 0,
            max_number_of_cores: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(TaskFarmError::InvalidConfiguration(problems)) => {
                assert_eq!(problems.len(), 4);
                assert!(problems.iter().any(|p| p.contains("FancyAlgorithm")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
