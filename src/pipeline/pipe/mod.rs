//! Pipes connect one output port to one input port.
//!
//! All variants share the [`Pipe`] contract and carry [`Token`]s: either an
//! element or the terminate marker that closes the pipe once consumed.
//!
//! # Variants
//!
//! - [`UnsynchedPipe`]: single slot, source and target on the same thread.
//! - [`BoundedPipe`]: bounded SPSC queue, sleeps while full.
//! - [`MpmcPipe`]: bounded MPMC queue, busy-spins while full.
//! - [`DummyPipe`]: placeholder for unconnected ports.

mod bounded;
mod dummy;
mod mpmc;
pub mod strategy;
mod unsynched;

pub use bounded::BoundedPipe;
pub use dummy::DummyPipe;
pub use mpmc::MpmcPipe;
pub use strategy::{BusySpin, InsertionStrategy, SleepIfFull};
pub use unsynched::UnsynchedPipe;

use crate::config::ExecutionConfig;
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::PortId;
use crate::pipeline::signal::Signal;
use crate::pipeline::state::StageHandle;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Type-erased element travelling through a pipe.
pub type Element = Box<dyn Any + Send>;

/// What a pipe carries.
pub enum Token {
    Element(Element),
    /// Closes the pipe once the target consumed it.
    Terminate,
}

impl Token {
    pub fn element<T: Send + 'static>(value: T) -> Self {
        Token::Element(Box::new(value))
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Token::Terminate)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Element(_) => f.write_str("Token::Element(..)"),
            Token::Terminate => f.write_str("Token::Terminate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Unsynched,
    BoundedSpsc,
    BoundedMpmc,
    Dummy,
}

impl PipeKind {
    /// Whether source and target may live on different threads.
    pub fn is_synched(self) -> bool {
        matches!(self, PipeKind::BoundedSpsc | PipeKind::BoundedMpmc)
    }
}

/// Queue used for pipes whose target runs on its own thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynchedPipeKind {
    #[default]
    Spsc,
    Mpmc,
}

/// Builds the queue for a connection whose target runs on its own thread.
pub fn synched_pipe(
    execution: &ExecutionConfig,
    source: PortId,
    target: PortId,
    target_stage: StageHandle,
    capacity: usize,
) -> Arc<dyn Pipe> {
    match execution.synched_pipe {
        SynchedPipeKind::Spsc => Arc::new(BoundedPipe::with_strategy(
            source,
            target,
            target_stage,
            capacity,
            Box::new(SleepIfFull::new(Duration::from_millis(
                execution.sleep_if_full_ms,
            ))),
        )),
        SynchedPipeKind::Mpmc => Arc::new(MpmcPipe::new(source, target, target_stage, capacity)),
    }
}

/// Shared contract of every pipe variant.
pub trait Pipe: Send + Sync + fmt::Debug {
    fn kind(&self) -> PipeKind;

    fn source_port(&self) -> PortId;

    fn target_port(&self) -> PortId;

    /// Stage owning the target port, used to abort blocked inserts.
    fn target_stage(&self) -> Option<&StageHandle>;

    /// Inserts `token`, waiting while the pipe is full.
    ///
    /// Never drops the token: it is either delivered or the call fails with
    /// [`PipelineError::Terminate`] because the execution is being torn down.
    fn add(&self, token: Token) -> Result<(), PipelineError>;

    /// Inserts `token` if there is room, handing it back otherwise.
    fn add_non_blocking(&self, token: Token) -> Result<(), Token>;

    /// Takes the oldest token without blocking. `None` means empty, not closed.
    fn remove_last(&self) -> Option<Token>;

    fn size(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Marks the pipe closed. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn send_signal(&self, signal: Signal);

    fn take_signal(&self) -> Option<Signal>;

    /// Waits up to `timeout` for the next signal.
    fn wait_for_signal(&self, timeout: Duration) -> Option<Signal> {
        let signal = self.take_signal();
        if signal.is_none() {
            std::thread::sleep(timeout);
        }
        signal
    }

    fn as_monitorable(&self) -> Option<&dyn MonitorablePipe> {
        None
    }
}

/// Pipes whose traffic can be sampled by the task-farm controller.
pub trait MonitorablePipe: Pipe {
    fn num_pushes_since_start(&self) -> u64;

    fn num_pulls_since_start(&self) -> u64;

    /// Pushes since the previous call.
    fn push_throughput(&self) -> u64;

    /// Pulls since the previous call.
    fn pull_throughput(&self) -> u64;

    /// How often an insert had to wait for a full pipe.
    fn num_waits(&self) -> u64;
}

/// Monotonic push/pull indices plus the last sampled values.
#[derive(Debug, Default)]
pub(crate) struct Traffic {
    pushes: AtomicU64,
    pulls: AtomicU64,
    last_pushes: AtomicU64,
    last_pulls: AtomicU64,
}

impl Traffic {
    pub(crate) fn record_push(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pull(&self) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    pub(crate) fn pulls(&self) -> u64 {
        self.pulls.load(Ordering::Relaxed)
    }

    pub(crate) fn push_delta(&self) -> u64 {
        let current = self.pushes();
        current.saturating_sub(self.last_pushes.swap(current, Ordering::Relaxed))
    }

    pub(crate) fn pull_delta(&self) -> u64 {
        let current = self.pulls();
        current.saturating_sub(self.last_pulls.swap(current, Ordering::Relaxed))
    }
}
