//! Transformer: applies a function to every element.
//!
//! Also the usual worker of a task farm: [`Transformer::worker`] returns a
//! factory that stamps out one transformer per worker instance.

use crate::pipeline::context::StageContext;
use crate::pipeline::port::{InputPort, OutputPort};
use crate::pipeline::stage::Stage;
use std::sync::Arc;

/// Stage mapping each input element to one output element.
pub struct Transformer<I, O, F> {
    input: InputPort<I>,
    output: OutputPort<O>,
    transform: F,
}

impl<I, O, F> Transformer<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    pub fn new(input: InputPort<I>, output: OutputPort<O>, transform: F) -> Self {
        Self {
            input,
            output,
            transform,
        }
    }
}

impl<I, O> Transformer<I, O, Box<dyn FnMut(I) -> O + Send>>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Worker factory sharing `transform` between all duplicates.
    pub fn worker<G>(
        transform: G,
    ) -> impl Fn(InputPort<I>, OutputPort<O>) -> Transformer<I, O, Box<dyn FnMut(I) -> O + Send>>
           + Send
           + Sync
           + 'static
    where
        G: Fn(I) -> O + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        move |input, output| {
            let transform = transform.clone();
            let boxed: Box<dyn FnMut(I) -> O + Send> = Box::new(move |value| transform(value));
            Transformer::new(input, output, boxed)
        }
    }
}

impl<I, O, F> Stage for Transformer<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        while let Some(value) = ctx.receive(self.input)? {
            let transformed = (self.transform)(value);
            ctx.send(self.output, transformed)?;
        }
        Ok(())
    }
}
