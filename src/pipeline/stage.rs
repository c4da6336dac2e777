//! The stage authoring contract and per-stage framework state.
//!
//! A user stage implements [`Stage`]; the framework wraps it in a
//! [`StageSlot`] together with its [`StageCore`] (ports, signals, hook
//! tracking). Slots are owned by exactly one thread at a time.

use crate::pipeline::context::StageContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::{PortDirection, PortId, StageId};
use crate::pipeline::pipe::{DummyPipe, Pipe, PipeKind};
use crate::pipeline::port::{InputPort, OutputPort, PortDescriptor, PortType};
use crate::pipeline::signal::{Signal, SignalTable};
use crate::pipeline::state::{StageHandle, StageState};
use std::sync::Arc;

/// A processing step of a pipeline.
///
/// `execute` is called repeatedly by the stage's thread (active stages) or
/// once per delivered element (passive stages). The hooks may be overridden
/// but must call their base hook on the context, otherwise the execution
/// fails with [`PipelineError::SuperNotCalled`].
pub trait Stage: Send + 'static {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()>;

    fn on_starting(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        ctx.base_on_starting()?;
        Ok(())
    }

    fn on_terminating(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        ctx.base_on_terminating()?;
        Ok(())
    }

    /// Consulted once all input ports are closed; returning `false` keeps the
    /// stage running.
    fn ready_to_terminate(&mut self, _ctx: &mut StageContext<'_>) -> Result<bool, PipelineError> {
        Ok(true)
    }
}

/// `Merger<u32>` becomes `Merger`.
pub fn simple_type_name<S: ?Sized>() -> &'static str {
    let full = std::any::type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A port together with the pipe attached to it.
pub(crate) struct PortState {
    pub descriptor: PortDescriptor,
    pub pipe: Arc<dyn Pipe>,
    pub open: bool,
}

impl PortState {
    fn unconnected(descriptor: PortDescriptor) -> Self {
        let pipe: Arc<dyn Pipe> = Arc::new(DummyPipe::new(descriptor.id));
        Self {
            descriptor,
            pipe,
            open: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pipe.kind() != PipeKind::Dummy
    }
}

/// Which base hooks ran during the current signal trigger.
#[derive(Debug, Default)]
pub(crate) struct HookCalls {
    starting: bool,
    terminating: bool,
}

impl HookCalls {
    pub fn reset(&mut self, signal: Signal) {
        match signal {
            Signal::Starting => self.starting = false,
            Signal::Terminating => self.terminating = false,
        }
    }

    pub fn mark(&mut self, signal: Signal) {
        match signal {
            Signal::Starting => self.starting = true,
            Signal::Terminating => self.terminating = true,
        }
    }

    pub fn was_called(&self, signal: Signal) -> bool {
        match signal {
            Signal::Starting => self.starting,
            Signal::Terminating => self.terminating,
        }
    }
}

/// Framework-side state of one stage.
pub struct StageCore {
    handle: StageHandle,
    active: bool,
    stateless: bool,
    producer: bool,
    inputs: Vec<Option<PortState>>,
    outputs: Vec<Option<PortState>>,
    num_open_inputs: usize,
    pub(crate) signals: SignalTable,
    pub(crate) hooks: HookCalls,
    outputs_closed: bool,
    received: u64,
}

impl StageCore {
    pub(crate) fn new(
        handle: StageHandle,
        inputs: Vec<PortDescriptor>,
        outputs: Vec<PortDescriptor>,
        active: bool,
        stateless: bool,
    ) -> Self {
        let producer = inputs.is_empty();
        Self {
            handle,
            active: active || producer,
            stateless,
            producer,
            inputs: inputs
                .into_iter()
                .map(|d| Some(PortState::unconnected(d)))
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|d| Some(PortState::unconnected(d)))
                .collect(),
            num_open_inputs: 0,
            signals: SignalTable::new(),
            hooks: HookCalls::default(),
            outputs_closed: false,
            received: 0,
        }
    }

    pub fn id(&self) -> StageId {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &StageHandle {
        &self.handle
    }

    pub fn state(&self) -> StageState {
        self.handle.state()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    pub fn is_producer(&self) -> bool {
        self.producer
    }

    pub fn num_open_inputs(&self) -> usize {
        self.num_open_inputs
    }

    /// A consumer whose every input port has been closed.
    pub fn inputs_exhausted(&self) -> bool {
        !self.producer && self.num_open_inputs == 0
    }

    pub(crate) fn input_descriptors(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.inputs.iter().flatten().map(|p| &p.descriptor)
    }

    pub(crate) fn output_descriptors(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.outputs.iter().flatten().map(|p| &p.descriptor)
    }

    pub(crate) fn input_ids(&self) -> Vec<PortId> {
        self.input_descriptors().map(|d| d.id).collect()
    }

    pub(crate) fn output_ids(&self) -> Vec<PortId> {
        self.output_descriptors().map(|d| d.id).collect()
    }

    /// Pipes of connected input ports that are still present.
    pub(crate) fn connected_input_pipes(&self) -> Vec<Arc<dyn Pipe>> {
        self.inputs
            .iter()
            .flatten()
            .filter(|p| p.is_connected())
            .map(|p| p.pipe.clone())
            .collect()
    }

    pub(crate) fn connected_input_indices(&self) -> Vec<u16> {
        self.inputs
            .iter()
            .flatten()
            .filter(|p| p.is_connected())
            .map(|p| p.descriptor.id.port_index())
            .collect()
    }

    pub(crate) fn output_pipes(&self) -> Vec<Arc<dyn Pipe>> {
        self.outputs.iter().flatten().map(|p| p.pipe.clone()).collect()
    }

    fn ports(&self, direction: PortDirection) -> &Vec<Option<PortState>> {
        match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        }
    }

    fn ports_mut(&mut self, direction: PortDirection) -> &mut Vec<Option<PortState>> {
        match direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        }
    }

    pub(crate) fn port(&self, id: PortId) -> Result<&PortState, PipelineError> {
        if id.stage() != self.id() {
            return Err(PipelineError::UnknownPort(id));
        }
        self.ports(id.direction())
            .get(id.port_index() as usize)
            .and_then(Option::as_ref)
            .ok_or(PipelineError::UnknownPort(id))
    }

    fn port_mut(&mut self, id: PortId) -> Result<&mut PortState, PipelineError> {
        if id.stage() != self.id() {
            return Err(PipelineError::UnknownPort(id));
        }
        self.ports_mut(id.direction())
            .get_mut(id.port_index() as usize)
            .and_then(Option::as_mut)
            .ok_or(PipelineError::UnknownPort(id))
    }

    /// Replaces the placeholder pipe of a declared port.
    pub(crate) fn attach_pipe(&mut self, id: PortId, pipe: Arc<dyn Pipe>) -> Result<(), PipelineError> {
        let port = self.port_mut(id)?;
        if port.is_connected() {
            return Err(PipelineError::PortAlreadyConnected(id));
        }
        let opens_input = id.direction() == PortDirection::Input && pipe.kind() != PipeKind::Dummy;
        port.pipe = pipe;
        if opens_input {
            port.open = true;
            self.num_open_inputs += 1;
        }
        Ok(())
    }

    /// Adds a port at a previously reserved index while the stage is running.
    pub(crate) fn add_port(
        &mut self,
        descriptor: PortDescriptor,
        pipe: Arc<dyn Pipe>,
    ) -> Result<(), PipelineError> {
        let id = descriptor.id;
        if id.stage() != self.id() {
            return Err(PipelineError::UnknownPort(id));
        }
        let index = id.port_index() as usize;
        let ports = self.ports_mut(id.direction());
        if ports.len() <= index {
            ports.resize_with(index + 1, || None);
        }
        if ports[index].is_some() {
            return Err(PipelineError::PortAlreadyConnected(id));
        }
        ports[index] = Some(PortState::unconnected(descriptor));
        self.attach_pipe(id, pipe)
    }

    /// Drops a port and releases its index for reuse.
    ///
    /// A still open input no longer counts towards termination.
    pub(crate) fn remove_port(&mut self, id: PortId) -> Result<Arc<dyn Pipe>, PipelineError> {
        self.port(id)?;
        let index = id.port_index() as usize;
        let ports = self.ports_mut(id.direction());
        let removed = ports[index].take().ok_or(PipelineError::UnknownPort(id))?;
        while ports.last().is_some_and(Option::is_none) {
            ports.pop();
        }
        if removed.open {
            self.num_open_inputs -= 1;
        }
        if id.direction() == PortDirection::Input {
            self.signals.forget_port(id.port_index());
        }
        self.handle.release_port(id);
        Ok(removed.pipe)
    }

    /// Length of the port table of one direction, removed slots included.
    pub(crate) fn port_slots(&self, direction: PortDirection) -> usize {
        self.ports(direction).len()
    }

    /// Records a consumed terminate marker on `id`.
    pub(crate) fn close_input(&mut self, id: PortId) -> Result<(), PipelineError> {
        let port = self.port_mut(id)?;
        port.pipe.close();
        if port.open {
            port.open = false;
            self.num_open_inputs -= 1;
            tracing::trace!("{}: closed {:?}, {} open", self.name(), id, self.num_open_inputs);
        }
        Ok(())
    }

    pub(crate) fn is_input_open(&self, id: PortId) -> bool {
        self.port(id).map(|p| p.open).unwrap_or(false)
    }

    pub(crate) fn record_received(&mut self) {
        self.received += 1;
    }

    /// Elements received since the previous call.
    pub(crate) fn take_received(&mut self) -> u64 {
        std::mem::take(&mut self.received)
    }

    pub(crate) fn outputs_closed(&self) -> bool {
        self.outputs_closed
    }

    pub(crate) fn mark_outputs_closed(&mut self) {
        self.outputs_closed = true;
    }

    /// Moves to `Terminating` unless already there.
    pub(crate) fn terminate(&mut self) -> Result<(), PipelineError> {
        if self.state() < StageState::Terminating {
            self.handle.change_state(StageState::Terminating)?;
        }
        Ok(())
    }
}

/// A user stage and its framework state.
pub struct StageSlot {
    pub(crate) core: StageCore,
    pub(crate) stage: Box<dyn Stage>,
}

impl StageSlot {
    pub fn id(&self) -> StageId {
        self.core.id()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn handle(&self) -> &StageHandle {
        self.core.handle()
    }
}

/// Port and activity declarations of a stage that is about to be created.
///
/// Handles for every port are available before the stage value itself exists,
/// so the stage can be constructed with the ports it will use.
#[derive(Debug)]
pub struct StageDeclaration {
    id: StageId,
    inputs: Vec<PortDescriptor>,
    outputs: Vec<PortDescriptor>,
    active: bool,
    stateless: bool,
}

impl StageDeclaration {
    pub(crate) fn new(id: StageId) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            active: false,
            stateless: false,
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn input_port<T: 'static>(&mut self) -> InputPort<T> {
        InputPort::from_id(self.push_input(PortType::of::<T>(), None))
    }

    pub fn named_input_port<T: 'static>(&mut self, name: &str) -> InputPort<T> {
        InputPort::from_id(self.push_input(PortType::of::<T>(), Some(name)))
    }

    pub fn output_port<T: 'static>(&mut self) -> OutputPort<T> {
        OutputPort::from_id(self.push_output(PortType::of::<T>(), None))
    }

    pub fn named_output_port<T: 'static>(&mut self, name: &str) -> OutputPort<T> {
        OutputPort::from_id(self.push_output(PortType::of::<T>(), Some(name)))
    }

    fn push_input(&mut self, ty: PortType, name: Option<&str>) -> PortId {
        let id = PortId::new(self.id, PortDirection::Input, self.inputs.len() as u16);
        self.inputs.push(Self::descriptor(id, ty, name));
        id
    }

    fn push_output(&mut self, ty: PortType, name: Option<&str>) -> PortId {
        let id = PortId::new(self.id, PortDirection::Output, self.outputs.len() as u16);
        self.outputs.push(Self::descriptor(id, ty, name));
        id
    }

    fn descriptor(id: PortId, ty: PortType, name: Option<&str>) -> PortDescriptor {
        let descriptor = PortDescriptor::new(id, ty);
        match name {
            Some(name) => descriptor.named(name),
            None => descriptor,
        }
    }

    /// Runs the stage on its own thread.
    pub fn set_active(&mut self) {
        self.active = true;
    }

    pub fn set_stateless(&mut self) {
        self.stateless = true;
    }

    pub(crate) fn finish<S: Stage>(self, name: String, stage: S) -> StageSlot {
        let handle = StageHandle::new(
            self.id,
            name,
            self.inputs.len() as u16,
            self.outputs.len() as u16,
        );
        StageSlot {
            core: StageCore::new(handle, self.inputs, self.outputs, self.active, self.stateless),
            stage: Box::new(stage),
        }
    }
}
