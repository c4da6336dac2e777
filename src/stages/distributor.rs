//! Distributor: fans one input out over a changing set of output ports.
//!
//! Output ports are added and removed at runtime through the distributor's
//! [`PortActionQueue`]; the queue is drained at the start of every execution
//! turn and one last time while terminating.

use crate::pipeline::context::StageContext;
use crate::pipeline::port::{InputPort, OutputPort};
use crate::pipeline::stage::Stage;
use crate::stages::port_action::PortActionQueue;

/// Decides which output ports receive an element.
pub trait DistributionStrategy<T>: Send + 'static {
    fn distribute(
        &mut self,
        ctx: &mut StageContext<'_>,
        outputs: &[OutputPort<T>],
        element: T,
    ) -> anyhow::Result<()>;
}

/// Sends each element to the next output port in turn.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    next: usize,
}

impl<T: Send + 'static> DistributionStrategy<T> for RoundRobinStrategy {
    fn distribute(
        &mut self,
        ctx: &mut StageContext<'_>,
        outputs: &[OutputPort<T>],
        element: T,
    ) -> anyhow::Result<()> {
        if outputs.is_empty() {
            anyhow::bail!("no output port to distribute an element to");
        }
        let port = outputs[self.next % outputs.len()];
        self.next = (self.next + 1) % outputs.len();
        ctx.send(port, element)?;
        Ok(())
    }
}

/// Sends a clone of each element to every output port.
#[derive(Debug, Default)]
pub struct CopyByReferenceStrategy;

impl<T: Clone + Send + 'static> DistributionStrategy<T> for CopyByReferenceStrategy {
    fn distribute(
        &mut self,
        ctx: &mut StageContext<'_>,
        outputs: &[OutputPort<T>],
        element: T,
    ) -> anyhow::Result<()> {
        let Some((last, rest)) = outputs.split_last() else {
            anyhow::bail!("no output port to copy an element to");
        };
        for port in rest {
            ctx.send(*port, element.clone())?;
        }
        ctx.send(*last, element)?;
        Ok(())
    }
}

/// Passive fan-out stage.
pub struct Distributor<T> {
    input: InputPort<T>,
    strategy: Box<dyn DistributionStrategy<T>>,
    actions: PortActionQueue,
    outputs: Vec<OutputPort<T>>,
    outputs_stale: bool,
}

impl<T: Send + 'static> Distributor<T> {
    /// Round-robin distributor.
    pub fn new(input: InputPort<T>) -> Self {
        Self::with_strategy(input, RoundRobinStrategy::default())
    }

    pub fn with_strategy(input: InputPort<T>, strategy: impl DistributionStrategy<T>) -> Self {
        Self {
            input,
            strategy: Box::new(strategy),
            actions: PortActionQueue::new(),
            outputs: Vec::new(),
            outputs_stale: true,
        }
    }

    /// Queue through which other threads change the output ports.
    pub fn actions(&self) -> PortActionQueue {
        self.actions.clone()
    }

    fn refresh_outputs(&mut self, ctx: &StageContext<'_>) {
        if self.outputs_stale {
            self.outputs = ctx
                .output_ports()
                .into_iter()
                .map(OutputPort::from_id)
                .collect();
            self.outputs_stale = false;
        }
    }
}

impl<T: Send + 'static> Stage for Distributor<T> {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        if self.actions.drain(ctx)? > 0 {
            self.outputs_stale = true;
        }
        self.refresh_outputs(ctx);
        while let Some(element) = ctx.receive(self.input)? {
            self.strategy.distribute(ctx, &self.outputs, element)?;
        }
        Ok(())
    }

    fn on_terminating(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        let executed = self.actions.close_and_drain(ctx)?;
        if executed > 0 {
            tracing::debug!("{}: applied {} port actions while terminating", ctx.stage_name(), executed);
        }
        ctx.base_on_terminating()?;
        Ok(())
    }
}
