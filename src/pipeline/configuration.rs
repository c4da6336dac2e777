//! Declaring stages and connecting their ports.

use crate::config::ExecutionConfig;
use crate::pipeline::error::PipelineError;
use crate::pipeline::exception::ExceptionListener;
use crate::pipeline::id::{PipeId, PortDirection, PortId, StageId};
use crate::pipeline::port::{InputPort, OutputPort};
use crate::pipeline::runtime::RuntimeService;
use crate::pipeline::stage::{simple_type_name, Stage, StageDeclaration, StageSlot};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-type ordinal used for stage names (`Collector-0`, `Collector-1`, ...).
#[derive(Debug, Clone, Default)]
pub struct InstanceCounter {
    counts: HashMap<String, u32>,
}

impl InstanceCounter {
    pub fn next_name(&mut self, type_name: &str) -> String {
        let count = self.counts.entry(type_name.to_string()).or_insert(0);
        let name = format!("{type_name}-{count}");
        *count += 1;
        name
    }
}

/// A declared connection between two ports.
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub source: PortId,
    pub target: PortId,
    pub capacity: usize,
}

/// The graph of an execution before it is validated.
///
/// Stages live in an arena indexed by [`StageId`]; connections in an arena
/// indexed by [`PipeId`].
pub struct Configuration {
    pub(crate) stages: Vec<StageSlot>,
    pub(crate) connections: Vec<Connection>,
    connected: HashSet<PortId>,
    pub(crate) instances: InstanceCounter,
    pub(crate) services: Vec<Box<dyn RuntimeService>>,
    pub(crate) execution: ExecutionConfig,
    pub(crate) listener: Option<Arc<dyn ExceptionListener>>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::with_execution_config(ExecutionConfig::default())
    }

    pub fn with_execution_config(execution: ExecutionConfig) -> Self {
        Self {
            stages: Vec::new(),
            connections: Vec::new(),
            connected: HashSet::new(),
            instances: InstanceCounter::default(),
            services: Vec::new(),
            execution,
            listener: None,
        }
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.execution
    }

    /// Starts declaring a new stage.
    pub fn stage(&mut self) -> StageBuilder<'_> {
        let id = StageId(self.stages.len() as u32);
        StageBuilder {
            config: self,
            declaration: StageDeclaration::new(id),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.index()).map(StageSlot::name)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connects two ports with a pipe of the default capacity.
    ///
    /// The element types are checked when the configuration is validated, so
    /// that every mismatch is reported at once.
    pub fn connect_ports<A, B>(
        &mut self,
        source: OutputPort<A>,
        target: InputPort<B>,
    ) -> Result<PipeId, PipelineError> {
        let capacity = self.execution.default_pipe_capacity;
        self.connect_ports_with_capacity(source, target, capacity)
    }

    pub fn connect_ports_with_capacity<A, B>(
        &mut self,
        source: OutputPort<A>,
        target: InputPort<B>,
        capacity: usize,
    ) -> Result<PipeId, PipelineError> {
        self.connect(source.id(), target.id(), capacity)
    }

    pub(crate) fn connect(
        &mut self,
        source: PortId,
        target: PortId,
        capacity: usize,
    ) -> Result<PipeId, PipelineError> {
        for port in [source, target] {
            if port.stage().index() >= self.stages.len() {
                return Err(PipelineError::UnknownPort(port));
            }
            if self.connected.contains(&port) {
                return Err(PipelineError::PortAlreadyConnected(port));
            }
        }
        if source.direction() != PortDirection::Output {
            return Err(PipelineError::UnknownPort(source));
        }
        if target.direction() != PortDirection::Input {
            return Err(PipelineError::UnknownPort(target));
        }

        self.connected.insert(source);
        self.connected.insert(target);
        let id = PipeId(self.connections.len() as u32);
        self.connections.push(Connection {
            source,
            target,
            capacity: capacity.max(1),
        });
        Ok(id)
    }

    /// Registers a service started together with the execution.
    pub fn add_service(&mut self, service: Box<dyn RuntimeService>) {
        self.services.push(service);
    }

    /// Replaces the listener selected by the configured exception policy.
    pub fn set_exception_listener(&mut self, listener: Arc<dyn ExceptionListener>) {
        self.listener = Some(listener);
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares the ports and flags of a stage, then adds it to the configuration.
pub struct StageBuilder<'a> {
    config: &'a mut Configuration,
    declaration: StageDeclaration,
}

impl StageBuilder<'_> {
    pub fn id(&self) -> StageId {
        self.declaration.id()
    }

    pub fn input_port<T: 'static>(&mut self) -> InputPort<T> {
        self.declaration.input_port()
    }

    pub fn named_input_port<T: 'static>(&mut self, name: &str) -> InputPort<T> {
        self.declaration.named_input_port(name)
    }

    pub fn output_port<T: 'static>(&mut self) -> OutputPort<T> {
        self.declaration.output_port()
    }

    pub fn named_output_port<T: 'static>(&mut self, name: &str) -> OutputPort<T> {
        self.declaration.named_output_port(name)
    }

    /// Runs the stage on a thread of its own.
    pub fn active(mut self) -> Self {
        self.declaration.set_active();
        self
    }

    pub fn stateless(mut self) -> Self {
        self.declaration.set_stateless();
        self
    }

    pub fn build<S: Stage>(self, stage: S) -> StageId {
        let id = self.declaration.id();
        let name = self.config.instances.next_name(simple_type_name::<S>());
        tracing::trace!("Declared stage {} as {:?}", name, id);
        self.config.stages.push(self.declaration.finish(name, stage));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::StageContext;

    struct Sink;

    impl Stage for Sink {
        fn execute(&mut self, _ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_instance_counter_is_per_type() {
        let mut counter = InstanceCounter::default();
        assert_eq!(counter.next_name("Sink"), "Sink-0");
        assert_eq!(counter.next_name("Sink"), "Sink-1");
        assert_eq!(counter.next_name("Merger"), "Merger-0");
    }

    #[test]
    fn test_stage_names_are_scoped_to_configuration() {
        for _ in 0..2 {
            let mut config = Configuration::new();
            let first = config.stage().build(Sink);
            let second = config.stage().build(Sink);
            assert_eq!(config.stage_name(first), Some("Sink-0"));
            assert_eq!(config.stage_name(second), Some("Sink-1"));
        }
    }

    #[test]
    fn test_port_connects_only_once() {
        let mut config = Configuration::new();
        let mut producer = config.stage();
        let out = producer.output_port::<u32>();
        producer.build(Sink);

        let mut a = config.stage();
        let in_a = a.input_port::<u32>();
        a.build(Sink);
        let mut b = config.stage();
        let in_b = b.input_port::<u32>();
        b.build(Sink);

        assert_eq!(config.connect_ports(out, in_a).unwrap(), PipeId(0));
        assert!(matches!(
            config.connect_ports(out, in_b),
            Err(PipelineError::PortAlreadyConnected(_))
        ));
        assert_eq!(config.connections().len(), 1);
    }

    #[test]
    fn test_connect_rejects_undeclared_stage() {
        let mut config = Configuration::new();
        let mut producer = config.stage();
        let out = producer.output_port::<u32>();
        producer.build(Sink);

        let foreign = InputPort::<u32>::from_id(PortId::new(StageId(8), PortDirection::Input, 0));
        assert!(matches!(
            config.connect_ports(out, foreign),
            Err(PipelineError::UnknownPort(_))
        ));
    }
}
