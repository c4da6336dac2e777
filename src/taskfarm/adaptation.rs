//! The adaptation thread of a task farm.
//!
//! Every `adaptation_interval_ms` the thread samples the input pipes of all
//! workers, scores the summed throughput with the configured algorithm and
//! applies the command decided by the [`ReconfigurationCommandService`].
//!
//! Worker ports are never touched from this thread. New ports are handed to
//! the distributor and merger as port actions, which their own threads run at
//! the start of their next execution turn.

use super::analysis::{self, AnalysisService};
use super::config::TaskFarmConfiguration;
use super::error::TaskFarmError;
use super::history::ThroughputHistory;
use super::monitoring::{PipeSample, TaskFarmMonitor};
use super::reconfiguration::{ReconfigurationCommand, ReconfigurationCommandService};
use super::TaskFarmDuplicable;
use crate::pipeline::context::StageContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::exception::FurtherExecution;
use crate::pipeline::id::{PortDirection, PortId, StageId};
use crate::pipeline::pipe::{synched_pipe, Pipe};
use crate::pipeline::runtime::{RuntimeHandle, RuntimeService, ServiceContext};
use crate::pipeline::signal::Signal;
use crate::pipeline::state::{StageHandle, StageState};
use crate::stages::PortActionQueue;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the adaptation thread knows about one worker.
struct Worker {
    handle: StageHandle,
    pipe: Arc<dyn Pipe>,
    distributor_port: PortId,
    monitor_id: usize,
    last_push: u64,
    last_pull: u64,
}

impl Worker {
    fn new(handle: StageHandle, pipe: Arc<dyn Pipe>, distributor_port: PortId, monitor_id: usize) -> Self {
        Self {
            handle,
            pipe,
            distributor_port,
            monitor_id,
            last_push: 0,
            last_pull: 0,
        }
    }

    fn sample(&mut self) {
        if let Some(pipe) = self.pipe.as_monitorable() {
            self.last_push = pipe.push_throughput();
            self.last_pull = pipe.pull_throughput();
        }
    }
}

/// Static layout of a farm, fixed when the farm is built.
pub(crate) struct FarmLayout {
    pub distributor: StageId,
    pub merger: StageId,
    pub distributor_actions: PortActionQueue,
    pub merger_actions: PortActionQueue,
    /// Input port of the first worker
    pub first_worker_input: PortId,
    /// Distributor output feeding the first worker
    pub first_distributor_port: PortId,
}

/// Runtime service that starts the adaptation thread of one farm.
pub(crate) struct AdaptationService<I, O, W> {
    name: String,
    template: W,
    config: TaskFarmConfiguration,
    layout: FarmLayout,
    monitor: TaskFarmMonitor,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, W> AdaptationService<I, O, W>
where
    I: Send + 'static,
    O: Send + 'static,
    W: TaskFarmDuplicable<I, O>,
{
    pub(crate) fn new(
        name: String,
        template: W,
        config: TaskFarmConfiguration,
        layout: FarmLayout,
        monitor: TaskFarmMonitor,
    ) -> Self {
        Self {
            name,
            template,
            config,
            layout,
            monitor,
            _types: PhantomData,
        }
    }

    fn into_thread(self, ctx: &ServiceContext) -> Result<AdaptationThread<I, O, W>, TaskFarmError> {
        let stage = |id| ctx.stage(id).ok_or(PipelineError::UnknownStage(id));
        let distributor = stage(self.layout.distributor)?;
        let merger = stage(self.layout.merger)?;
        let first = stage(self.layout.first_worker_input.stage())?;
        let pipe = ctx
            .pipe_into(self.layout.first_worker_input)
            .ok_or(PipelineError::UnknownPort(self.layout.first_worker_input))?;
        if pipe.as_monitorable().is_none() {
            return Err(TaskFarmError::InvalidPipe(first.name().to_string()));
        }
        let algorithm = analysis::create_algorithm(&self.config)?;

        Ok(AdaptationThread {
            runtime: ctx.runtime().clone(),
            template: self.template,
            distributor,
            merger,
            distributor_actions: self.layout.distributor_actions,
            merger_actions: self.layout.merger_actions,
            workers: vec![Worker::new(first, pipe, self.layout.first_distributor_port, 0)],
            next_monitor_id: 1,
            history: ThroughputHistory::for_window(self.config.analysis_window),
            analysis: AnalysisService::new(algorithm, self.config.analysis_window),
            commands: ReconfigurationCommandService::new(&self.config),
            monitor: self.monitor,
            interval: Duration::from_millis(self.config.adaptation_interval_ms),
            pipe_capacity: self.config.pipe_capacity,
            _types: PhantomData,
        })
    }
}

impl<I, O, W> RuntimeService for AdaptationService<I, O, W>
where
    I: Send + 'static,
    O: Send + 'static,
    W: TaskFarmDuplicable<I, O>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start(self: Box<Self>, ctx: &ServiceContext) -> Result<(), PipelineError> {
        let name = self.name.clone();
        let thread = self.into_thread(ctx).map_err(|e| PipelineError::Service {
            name: name.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!("Starting {} with {}", name, thread.analysis.algorithm_name());
        ctx.runtime().spawn_service(&name, move || thread.run())
    }
}

struct AdaptationThread<I, O, W> {
    runtime: RuntimeHandle,
    template: W,
    distributor: StageHandle,
    merger: StageHandle,
    distributor_actions: PortActionQueue,
    merger_actions: PortActionQueue,
    workers: Vec<Worker>,
    next_monitor_id: usize,
    history: ThroughputHistory,
    analysis: AnalysisService,
    commands: ReconfigurationCommandService,
    monitor: TaskFarmMonitor,
    interval: Duration,
    pipe_capacity: usize,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, W> AdaptationThread<I, O, W>
where
    I: Send + 'static,
    O: Send + 'static,
    W: TaskFarmDuplicable<I, O>,
{
    fn is_finished(&self) -> bool {
        self.runtime.is_shutdown()
            || self.runtime.is_aborted()
            || self.distributor.state() >= StageState::Terminating
    }

    fn run(mut self) {
        let start = Instant::now();
        while !self.is_finished() {
            self.iterate(start.elapsed().as_secs_f64() * 1000.0);
            std::thread::sleep(self.interval);
        }
        tracing::debug!(
            "Adaptation of {} finished with {} workers",
            self.distributor.name(),
            self.workers.len()
        );
    }

    fn iterate(&mut self, elapsed_ms: f64) {
        for worker in &mut self.workers {
            worker.sample();
        }
        let push_sum: u64 = self.workers.iter().map(|w| w.last_push).sum();
        self.history.add(elapsed_ms, push_sum as f64);

        let score = self.analysis.analyze(&self.history);
        let queue_sizes: Vec<usize> = self.workers.iter().map(|w| w.pipe.size()).collect();
        match self.commands.decide(score, &queue_sizes) {
            ReconfigurationCommand::Add => {
                if let Err(err) = self.add_worker() {
                    self.report_failure(err);
                }
            }
            ReconfigurationCommand::Remove(index) => self.remove_worker(index),
            ReconfigurationCommand::None => {}
        }

        if self.monitor.is_enabled() {
            let samples: Vec<PipeSample<'_>> = self
                .workers
                .iter()
                .filter_map(|w| {
                    w.pipe.as_monitorable().map(|pipe| PipeSample {
                        id: w.monitor_id,
                        pipe,
                        push_throughput: w.last_push,
                        pull_throughput: w.last_pull,
                    })
                })
                .collect();
            self.monitor.record(&samples);
        }
    }

    /// Hands a failed reconfiguration to the execution's exception listener.
    ///
    /// The farm keeps its current workers unless the listener terminates.
    fn report_failure(&self, err: PipelineError) {
        let err = anyhow::Error::new(err).context("adding a task farm worker failed");
        let verdict = self
            .runtime
            .exceptions()
            .report(&err, self.distributor.name());
        if verdict == FurtherExecution::Terminate {
            self.runtime.on_terminate();
        }
    }

    fn add_worker(&mut self) -> Result<(), PipelineError> {
        let distributor_port = PortId::try_new(
            self.distributor.id(),
            PortDirection::Output,
            self.distributor.reserve_output_port()?,
        )?;
        let merger_port = match self
            .merger
            .reserve_input_port()
            .and_then(|index| PortId::try_new(self.merger.id(), PortDirection::Input, index))
        {
            Ok(port) => port,
            Err(err) => {
                self.distributor.release_port(distributor_port);
                return Err(err);
            }
        };
        let distributor_index = distributor_port.port_index();
        let merger_index = merger_port.port_index();

        let mut declaration = self.runtime.declare_stage();
        if let Err(err) = PortId::try_new(declaration.id(), PortDirection::Input, 0) {
            self.distributor.release_port(distributor_port);
            self.merger.release_port(merger_port);
            return Err(err);
        }
        let input = declaration.input_port::<I>();
        let output = declaration.output_port::<O>();
        declaration.set_active();
        declaration.set_stateless();
        let mut slot = self
            .runtime
            .create_stage(declaration, self.template.duplicate(input, output));
        let handle = slot.handle().clone();

        let config = self.runtime.config();
        let to_worker = synched_pipe(
            config,
            distributor_port,
            input.id(),
            handle.clone(),
            self.pipe_capacity,
        );
        let from_worker = synched_pipe(
            config,
            output.id(),
            merger_port,
            self.merger.clone(),
            self.pipe_capacity,
        );
        slot.core.attach_pipe(input.id(), to_worker.clone())?;
        slot.core.attach_pipe(output.id(), from_worker.clone())?;

        // keeps the merger alive until the new input is attached
        let guard = self.merger_actions.reserve();
        let merger_actions = self.merger_actions.clone();
        let distributor_pipe = to_worker.clone();
        let sent = self.distributor_actions.send(Box::new(move |ctx: &mut StageContext<'_>| {
            let port = ctx.add_output_port::<I>(distributor_index, distributor_pipe)?;
            let attached = merger_actions.send(Box::new(move |ctx: &mut StageContext<'_>| {
                ctx.add_input_port::<O>(merger_index, from_worker)?;
                drop(guard);
                Ok(())
            }));
            if attached.is_err() {
                tracing::warn!("{}: merger already terminated", ctx.stage_name());
            }
            ctx.runtime().start_stage(slot)?;
            ctx.send_signal(port.id(), Signal::Starting)
        }));
        if sent.is_err() {
            tracing::debug!("Distributor {} already terminated, dropping new worker", self.distributor.name());
            self.distributor.release_port(distributor_port);
            self.merger.release_port(merger_port);
            return Ok(());
        }

        let monitor_id = self.next_monitor_id;
        self.next_monitor_id += 1;
        self.workers
            .push(Worker::new(handle, to_worker, distributor_port, monitor_id));
        tracing::info!(
            "Task farm {}: added worker ({} workers)",
            self.distributor.name(),
            self.workers.len()
        );
        Ok(())
    }

    fn remove_worker(&mut self, index: usize) {
        if index == 0 || index >= self.workers.len() {
            return;
        }
        let worker = self.workers.remove(index);
        let port = worker.distributor_port;
        if self
            .distributor_actions
            .send(Box::new(move |ctx: &mut StageContext<'_>| {
                ctx.remove_output_port(port)
            }))
            .is_err()
        {
            tracing::debug!("Distributor {} already terminated", self.distributor.name());
            return;
        }
        tracing::info!(
            "Task farm {}: removing {} ({} workers)",
            self.distributor.name(),
            worker.handle.name(),
            self.workers.len()
        );
    }
}
