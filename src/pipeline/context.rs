//! The view a stage gets of the framework while one of its callbacks runs.

use crate::pipeline::error::PipelineError;
use crate::pipeline::executor::ThreadDomain;
use crate::pipeline::id::{PortDirection, PortId, StageId};
use crate::pipeline::pipe::{Pipe, Token};
use crate::pipeline::port::{InputPort, OutputPort, PortDescriptor, PortType};
use crate::pipeline::runtime::RuntimeHandle;
use crate::pipeline::signal::Signal;
use crate::pipeline::stage::StageCore;
use crate::pipeline::state::{StageHandle, StageState};
use std::sync::Arc;

/// Access to the ports and lifecycle of the stage being executed.
///
/// Sending into a pipe whose target is a passive stage on the same thread
/// executes that stage before `send` returns.
pub struct StageContext<'a> {
    core: &'a mut StageCore,
    domain: &'a mut ThreadDomain,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(core: &'a mut StageCore, domain: &'a mut ThreadDomain) -> Self {
        Self { core, domain }
    }

    pub fn stage_id(&self) -> StageId {
        self.core.id()
    }

    pub fn stage_name(&self) -> &str {
        self.core.name()
    }

    pub fn handle(&self) -> &StageHandle {
        self.core.handle()
    }

    pub fn state(&self) -> StageState {
        self.core.state()
    }

    pub fn is_producer(&self) -> bool {
        self.core.is_producer()
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        self.domain.runtime()
    }

    pub fn num_open_inputs(&self) -> usize {
        self.core.num_open_inputs()
    }

    /// Takes the next element from `port`.
    ///
    /// Returns `Ok(None)` when the pipe is empty. A consumed terminate marker
    /// closes the port and also yields `Ok(None)`.
    pub fn receive<T: 'static>(&mut self, port: InputPort<T>) -> Result<Option<T>, PipelineError> {
        match self.receive_token(port.id())? {
            Some(element) => element
                .downcast::<T>()
                .map(|value| Some(*value))
                .map_err(|_| PipelineError::ElementType {
                    port: port.id(),
                    expected: std::any::type_name::<T>(),
                }),
            None => Ok(None),
        }
    }

    fn receive_token(&mut self, id: PortId) -> Result<Option<Box<dyn std::any::Any + Send>>, PipelineError> {
        let pipe = self.core.port(id)?.pipe.clone();
        match pipe.remove_last() {
            Some(Token::Element(element)) => {
                self.core.record_received();
                Ok(Some(element))
            }
            Some(Token::Terminate) => {
                self.core.close_input(id)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Whether `port` still expects elements.
    pub fn is_open(&self, port: PortId) -> bool {
        self.core.is_input_open(port)
    }

    /// Delivers `value` into `port`, waiting while the pipe is full.
    pub fn send<T: Send + 'static>(&mut self, port: OutputPort<T>, value: T) -> Result<(), PipelineError> {
        self.send_token(port.id(), Token::element(value))
    }

    /// Delivers `value` if the pipe has room, handing it back otherwise.
    pub fn try_send<T: Send + 'static>(
        &mut self,
        port: OutputPort<T>,
        value: T,
    ) -> Result<Option<T>, PipelineError> {
        let pipe = self.core.port(port.id())?.pipe.clone();
        match pipe.add_non_blocking(Token::element(value)) {
            Ok(()) => {
                self.after_add(&pipe)?;
                Ok(None)
            }
            Err(Token::Element(element)) => Ok(element.downcast::<T>().ok().map(|v| *v)),
            Err(Token::Terminate) => Ok(None),
        }
    }

    pub(crate) fn send_token(&mut self, id: PortId, token: Token) -> Result<(), PipelineError> {
        let pipe = self.core.port(id)?.pipe.clone();
        pipe.add(token)?;
        self.after_add(&pipe)
    }

    fn after_add(&mut self, pipe: &Arc<dyn Pipe>) -> Result<(), PipelineError> {
        if pipe.kind().is_synched() {
            return Ok(());
        }
        match pipe.target_stage() {
            Some(target) => self.domain.on_element_added(target.id()),
            None => Ok(()),
        }
    }

    /// Sends `signal` into one output port.
    pub fn send_signal(&mut self, port: PortId, signal: Signal) -> Result<(), PipelineError> {
        let pipe = self.core.port(port)?.pipe.clone();
        pipe.send_signal(signal);
        if pipe.kind().is_synched() {
            Ok(())
        } else {
            self.domain.on_signal_added(&pipe)
        }
    }

    /// Declares that a producer has nothing more to emit.
    ///
    /// Every output port is closed with a terminate marker at the end of the
    /// current execution turn.
    pub fn work_completed(&mut self) -> Result<(), PipelineError> {
        if !self.core.is_producer() {
            return Err(PipelineError::WorkCompletedByConsumer(
                self.core.name().to_string(),
            ));
        }
        self.core.terminate()
    }

    /// Base behaviour of [`Stage::on_starting`](super::Stage::on_starting).
    pub fn base_on_starting(&mut self) -> Result<(), PipelineError> {
        self.core.hooks.mark(Signal::Starting);
        self.core.handle().change_state(StageState::Started)
    }

    /// Base behaviour of [`Stage::on_terminating`](super::Stage::on_terminating).
    pub fn base_on_terminating(&mut self) -> Result<(), PipelineError> {
        self.core.hooks.mark(Signal::Terminating);
        self.core.handle().change_state(StageState::Terminated)
    }

    /// Input ports currently present, in index order.
    pub fn input_ports(&self) -> Vec<PortId> {
        self.core.input_ids()
    }

    /// Output ports currently present, in index order.
    pub fn output_ports(&self) -> Vec<PortId> {
        self.core.output_ids()
    }

    /// Attaches an input port at an index reserved through the stage handle.
    pub fn add_input_port<T: 'static>(
        &mut self,
        index: u16,
        pipe: Arc<dyn Pipe>,
    ) -> Result<InputPort<T>, PipelineError> {
        let id = PortId::try_new(self.core.id(), PortDirection::Input, index)?;
        self.core
            .add_port(PortDescriptor::new(id, PortType::of::<T>()), pipe)?;
        tracing::debug!("{}: attached input {:?}", self.core.name(), id);
        Ok(InputPort::from_id(id))
    }

    /// Attaches an output port at an index reserved through the stage handle.
    ///
    /// If this stage already closed its outputs, the new port is closed right away.
    pub fn add_output_port<T: 'static>(
        &mut self,
        index: u16,
        pipe: Arc<dyn Pipe>,
    ) -> Result<OutputPort<T>, PipelineError> {
        let id = PortId::try_new(self.core.id(), PortDirection::Output, index)?;
        self.core
            .add_port(PortDescriptor::new(id, PortType::of::<T>()), pipe)?;
        tracing::debug!("{}: attached output {:?}", self.core.name(), id);
        if self.core.outputs_closed() {
            self.send_token(id, Token::Terminate)?;
        }
        Ok(OutputPort::from_id(id))
    }

    /// Removes an input port; elements still queued in its pipe are dropped.
    pub fn remove_input_port(&mut self, port: PortId) -> Result<(), PipelineError> {
        self.core.remove_port(port)?;
        tracing::debug!("{}: removed input {:?}", self.core.name(), port);
        Ok(())
    }

    /// Closes an output port with a terminate marker and removes it.
    pub fn remove_output_port(&mut self, port: PortId) -> Result<(), PipelineError> {
        if !self.core.outputs_closed() {
            self.send_token(port, Token::Terminate)?;
        }
        self.core.remove_port(port)?;
        tracing::debug!("{}: removed output {:?}", self.core.name(), port);
        Ok(())
    }

    /// Whether the stage was declared free of state between elements.
    pub fn is_stateless(&self) -> bool {
        self.core.is_stateless()
    }
}
