use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Faults of the task farm and its adaptation thread
#[derive(Error, Debug)]
pub enum TaskFarmError {
    /// No throughput algorithm is registered under this name
    #[error("Unknown throughput algorithm {name:?} (known: {known})")]
    UnknownAlgorithm { name: String, known: String },

    /// Every problem found in a task farm configuration
    #[error("Invalid task farm configuration: {}", .0.join("; "))]
    InvalidConfiguration(Vec<String>),

    /// A worker input pipe does not provide throughput measurements
    #[error("Input pipe of {0} is not monitorable")]
    InvalidPipe(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
