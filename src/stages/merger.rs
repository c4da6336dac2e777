//! Merger: joins a changing set of input ports into one output.
//!
//! The merger reads its inputs with a non-blocking, finite round robin: each
//! execution turn polls every open input at most once, starting after the
//! port that delivered last, and forwards the first element found. Input
//! ports closed by a terminate marker are dropped.

use crate::pipeline::context::StageContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::port::{InputPort, OutputPort};
use crate::pipeline::stage::Stage;
use crate::stages::port_action::PortActionQueue;

/// Active fan-in stage.
pub struct Merger<T> {
    output: OutputPort<T>,
    actions: PortActionQueue,
    next: usize,
}

impl<T: Send + 'static> Merger<T> {
    pub fn new(output: OutputPort<T>) -> Self {
        Self {
            output,
            actions: PortActionQueue::new(),
            next: 0,
        }
    }

    /// Queue through which other threads add input ports.
    pub fn actions(&self) -> PortActionQueue {
        self.actions.clone()
    }

    fn prune_closed_inputs(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        for port in ctx.input_ports() {
            if !ctx.is_open(port) {
                ctx.remove_input_port(port)?;
            }
        }
        Ok(())
    }
}

impl<T: Send + 'static> Stage for Merger<T> {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        self.actions.drain(ctx)?;
        self.prune_closed_inputs(ctx)?;

        let inputs = ctx.input_ports();
        let count = inputs.len();
        for offset in 0..count {
            let index = (self.next + offset) % count;
            let port = InputPort::<T>::from_id(inputs[index]);
            if let Some(element) = ctx.receive(port)? {
                ctx.send(self.output, element)?;
                self.next = (index + 1) % count;
                break;
            }
        }
        Ok(())
    }

    /// Inputs announced through [`PortActionQueue::reserve`] keep the merger alive.
    fn ready_to_terminate(&mut self, ctx: &mut StageContext<'_>) -> Result<bool, PipelineError> {
        self.actions.drain(ctx)?;
        Ok(self.actions.in_flight() == 0)
    }

    fn on_terminating(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        self.actions.close_and_drain(ctx)?;
        ctx.base_on_terminating()?;
        Ok(())
    }
}
