//! Small stages used by the integration tests

use stagepipe::pipeline::{InputPort, OutputPort, Stage, StageContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Number of hook invocations seen by a [`CountingRelay`].
#[derive(Debug, Default)]
pub struct HookCounts {
    pub starting: AtomicUsize,
    pub terminating: AtomicUsize,
}

impl HookCounts {
    pub fn starting(&self) -> usize {
        self.starting.load(Ordering::SeqCst)
    }

    pub fn terminating(&self) -> usize {
        self.terminating.load(Ordering::SeqCst)
    }
}

/// Forwards every element unchanged and counts its hook calls.
pub struct CountingRelay<T> {
    input: InputPort<T>,
    output: OutputPort<T>,
    hooks: Arc<HookCounts>,
}

impl<T: Send + 'static> CountingRelay<T> {
    pub fn new(input: InputPort<T>, output: OutputPort<T>) -> Self {
        Self {
            input,
            output,
            hooks: Arc::new(HookCounts::default()),
        }
    }

    pub fn hooks(&self) -> Arc<HookCounts> {
        self.hooks.clone()
    }
}

impl<T: Send + 'static> Stage for CountingRelay<T> {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        while let Some(value) = ctx.receive(self.input)? {
            ctx.send(self.output, value)?;
        }
        Ok(())
    }

    fn on_starting(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        self.hooks.starting.fetch_add(1, Ordering::SeqCst);
        ctx.base_on_starting()?;
        Ok(())
    }

    fn on_terminating(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        self.hooks.terminating.fetch_add(1, Ordering::SeqCst);
        ctx.base_on_terminating()?;
        Ok(())
    }
}

/// Fails on every even element and forwards the odd ones.
pub struct RejectEven {
    pub input: InputPort<u32>,
    pub output: OutputPort<u32>,
}

impl Stage for RejectEven {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        if let Some(value) = ctx.receive(self.input)? {
            if value % 2 == 0 {
                anyhow::bail!("even element {value}");
            }
            ctx.send(self.output, value)?;
        }
        Ok(())
    }
}

/// Overrides `on_terminating` without calling the base hook.
pub struct SkipsBaseHook {
    pub input: InputPort<u32>,
}

impl Stage for SkipsBaseHook {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        while ctx.receive(self.input)?.is_some() {}
        Ok(())
    }

    fn on_terminating(&mut self, _ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards one element per turn after sleeping `delay`.
pub struct SlowRelay<T> {
    pub input: InputPort<T>,
    pub output: OutputPort<T>,
    pub delay: Duration,
}

impl<T: Send + 'static> Stage for SlowRelay<T> {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        if let Some(value) = ctx.receive(self.input)? {
            std::thread::sleep(self.delay);
            ctx.send(self.output, value)?;
        }
        Ok(())
    }
}
