//! # stagepipe: pipe-and-filter execution with an adaptive task farm
//!
//! A pipeline is a graph of stages connected by typed, bounded pipes. Each
//! stage reads elements from its input ports and writes results to its
//! output ports. Active stages (producers and stages declared active) run on
//! a thread of their own; passive stages run inline on the thread that feeds
//! them.
//!
//! ## Architecture
//!
//! - **Pipeline**: declaration, validation and execution of a stage graph
//!   ([`pipeline`])
//! - **Stages**: producers, collectors, transformers and the distributor and
//!   merger used by task farms ([`stages`])
//! - **Task farm**: a self-adapting group of parallel workers that grows and
//!   shrinks with the measured throughput ([`taskfarm`])
//! - **Configuration**: TOML settings for execution, task farms and logging
//!   ([`config`])
//!
//! ## Example
//!
//! ```no_run
//! use stagepipe::pipeline::{Configuration, Execution};
//! use stagepipe::stages::{Collector, ObjectProducer, Transformer};
//!
//! let mut config = Configuration::new();
//!
//! let mut producer = config.stage();
//! let numbers = producer.output_port::<u32>();
//! producer.build(ObjectProducer::new(numbers, 0..100u32));
//!
//! let mut square = config.stage().active();
//! let input = square.input_port::<u32>();
//! let squares = square.output_port::<u64>();
//! square.build(Transformer::new(input, squares, |x: u32| u64::from(x) * u64::from(x)));
//!
//! let mut sink = config.stage();
//! let results = sink.input_port::<u64>();
//! let collector = Collector::new(results);
//! let collected = collector.collected();
//! sink.build(collector);
//!
//! config.connect_ports(numbers, input)?;
//! config.connect_ports(squares, results)?;
//!
//! Execution::new(config)?.execute_blocking()?;
//! assert_eq!(collected.len(), 100);
//! # Ok::<(), stagepipe::pipeline::PipelineError>(())
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod stages;
pub mod taskfarm;

// Re-export commonly used types
pub use config::{EngineConfig, ExecutionConfig, LoggingConfig};
pub use error::{EngineError, Result};
pub use pipeline::{Configuration, Execution, ExecutionReport, PipelineError, Stage, StageContext};
pub use taskfarm::{TaskFarm, TaskFarmConfiguration, TaskFarmError, TaskFarmPorts};
