//! ObjectProducer: emits the items of an iterator, then completes.

use crate::pipeline::context::StageContext;
use crate::pipeline::port::OutputPort;
use crate::pipeline::stage::Stage;

/// Producer stage sending one item per execution turn.
///
/// Once the iterator is exhausted the producer declares its work completed,
/// which closes the output port with a terminate marker.
pub struct ObjectProducer<T> {
    output: OutputPort<T>,
    items: Box<dyn Iterator<Item = T> + Send>,
    sent: u64,
}

impl<T: Send + 'static> ObjectProducer<T> {
    pub fn new<I>(output: OutputPort<T>, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            output,
            items: Box::new(items.into_iter()),
            sent: 0,
        }
    }

    pub fn output_port(&self) -> OutputPort<T> {
        self.output
    }
}

impl<T: Send + 'static> Stage for ObjectProducer<T> {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        match self.items.next() {
            Some(item) => {
                ctx.send(self.output, item)?;
                self.sent += 1;
            }
            None => {
                tracing::debug!("{}: produced {} elements", ctx.stage_name(), self.sent);
                ctx.work_completed()?;
            }
        }
        Ok(())
    }
}
