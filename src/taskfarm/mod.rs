//! Self-adapting task farm.
//!
//! A task farm runs a variable number of identical worker stages in
//! parallel:
//!
//! ```text
//!               ┌──► Worker-0 ──┐
//!  Distributor ─┼──► Worker-1 ──┼─► Merger
//!               └──► Worker-n ──┘
//! ```
//!
//! The distributor spreads the incoming elements round robin over the
//! workers and the merger collects their results. An adaptation thread
//! watches the worker input pipes and adds a worker as long as each new one
//! raises the farm's throughput, then removes workers that sit idle.
//!
//! The farm starts with one worker. Further workers are duplicated from the
//! template given to [`TaskFarm::new`].

pub mod adaptation;
pub mod analysis;
pub mod config;
pub mod error;
pub mod history;
pub mod monitoring;
pub mod reconfiguration;

pub use analysis::{
    AnalysisService, MeanAlgorithm, RegressionAlgorithm, ThroughputAlgorithm, WeightMethod,
    WeightedAlgorithm, INVALID_SCORE,
};
pub use config::TaskFarmConfiguration;
pub use error::TaskFarmError;
pub use history::{ThroughputEntry, ThroughputHistory};
pub use monitoring::{
    MonitoringExport, PipeMeasurement, PipeMonitoringData, TaskFarmMonitor, TaskFarmMonitoringData,
};
pub use reconfiguration::{ReconfigurationCommand, ReconfigurationCommandService, ReconfigurationMode};

use crate::pipeline::configuration::Configuration;
use crate::pipeline::id::StageId;
use crate::pipeline::port::{InputPort, OutputPort};
use crate::pipeline::stage::Stage;
use crate::stages::{Distributor, Merger};
use adaptation::{AdaptationService, FarmLayout};
use std::marker::PhantomData;

/// Creates the worker stages of a farm.
///
/// Any `Fn(InputPort<I>, OutputPort<O>) -> impl Stage` closure is a
/// template, e.g. the factory returned by
/// [`Transformer::worker`](crate::stages::Transformer::worker).
pub trait TaskFarmDuplicable<I, O>: Send + Sync + 'static {
    type Worker: Stage;

    /// Builds a new worker reading from `input` and writing to `output`.
    fn duplicate(&self, input: InputPort<I>, output: OutputPort<O>) -> Self::Worker;
}

impl<I, O, F, W> TaskFarmDuplicable<I, O> for F
where
    F: Fn(InputPort<I>, OutputPort<O>) -> W + Send + Sync + 'static,
    W: Stage,
{
    type Worker = W;

    fn duplicate(&self, input: InputPort<I>, output: OutputPort<O>) -> W {
        self(input, output)
    }
}

/// The outer ports of a farm added to a configuration.
pub struct TaskFarmPorts<I, O> {
    /// Input of the distributor
    pub input: InputPort<I>,
    /// Output of the merger
    pub output: OutputPort<O>,
    pub distributor: StageId,
    pub merger: StageId,
    pub monitor: TaskFarmMonitor,
}

/// Builder adding a task farm to a [`Configuration`].
pub struct TaskFarm<I, O, W> {
    template: W,
    config: TaskFarmConfiguration,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, W> TaskFarm<I, O, W>
where
    I: Send + 'static,
    O: Send + 'static,
    W: TaskFarmDuplicable<I, O>,
{
    pub fn new(template: W, config: TaskFarmConfiguration) -> Self {
        Self {
            template,
            config,
            _types: PhantomData,
        }
    }

    /// Adds distributor, first worker, merger and the adaptation service.
    ///
    /// Fails before touching `configuration` if the farm configuration is
    /// invalid or names an unknown throughput algorithm.
    pub fn build(self, configuration: &mut Configuration) -> Result<TaskFarmPorts<I, O>, TaskFarmError> {
        self.config.validate()?;
        analysis::create_algorithm(&self.config)?;

        let mut builder = configuration.stage();
        let distributor_input = builder.input_port::<I>();
        let distributor_output = builder.output_port::<I>();
        let distributor = Distributor::new(distributor_input);
        let distributor_actions = distributor.actions();
        let distributor_id = builder.build(distributor);

        let mut builder = configuration.stage().active().stateless();
        let worker_input = builder.input_port::<I>();
        let worker_output = builder.output_port::<O>();
        builder.build(self.template.duplicate(worker_input, worker_output));

        let mut builder = configuration.stage().active();
        let merger_input = builder.input_port::<O>();
        let merger_output = builder.output_port::<O>();
        let merger = Merger::new(merger_output);
        let merger_actions = merger.actions();
        let merger_id = builder.build(merger);

        let capacity = self.config.pipe_capacity;
        configuration.connect_ports_with_capacity(distributor_output, worker_input, capacity)?;
        configuration.connect_ports_with_capacity(worker_output, merger_input, capacity)?;

        let monitor = TaskFarmMonitor::new(
            self.config.monitoring_enabled,
            self.config.throughput_score_boundary,
        );
        let layout = FarmLayout {
            distributor: distributor_id,
            merger: merger_id,
            distributor_actions,
            merger_actions,
            first_worker_input: worker_input.id(),
            first_distributor_port: distributor_output.id(),
        };
        let name = format!("Adaptation-{}", distributor_id.0);
        tracing::debug!(
            "Declared task farm {:?} -> {:?} using {}",
            distributor_id,
            merger_id,
            self.config.throughput_algorithm
        );
        configuration.add_service(Box::new(AdaptationService::new(
            name,
            self.template,
            self.config,
            layout,
            monitor.clone(),
        )));

        Ok(TaskFarmPorts {
            input: distributor_input,
            output: merger_output,
            distributor: distributor_id,
            merger: merger_id,
            monitor,
        })
    }
}
