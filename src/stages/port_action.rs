//! Port actions: structural changes executed by the owning stage.
//!
//! Other threads never touch a stage's ports directly. They queue a closure
//! that the stage runs on its own thread during its next execution turn.

use crate::pipeline::context::StageContext;
use crate::pipeline::error::PipelineError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A change to apply to the ports of the stage draining the queue.
pub type PortAction = Box<dyn FnOnce(&mut StageContext<'_>) -> Result<(), PipelineError> + Send>;

#[derive(Default)]
struct QueueState {
    actions: VecDeque<PortAction>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    in_flight: AtomicUsize,
}

/// Multi-producer queue of [`PortAction`]s drained by one stage.
#[derive(Clone, Default)]
pub struct PortActionQueue {
    shared: Arc<Shared>,
}

impl PortActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `action`, handing it back once the owning stage stopped accepting actions.
    pub fn send(&self, action: PortAction) -> Result<(), PortAction> {
        let mut state = self.state();
        if state.closed {
            return Err(action);
        }
        state.actions.push_back(action);
        Ok(())
    }

    /// Runs every queued action on the calling stage, oldest first.
    pub fn drain(&self, ctx: &mut StageContext<'_>) -> Result<usize, PipelineError> {
        let mut executed = 0;
        loop {
            let next = self.state().actions.pop_front();
            let Some(action) = next else {
                return Ok(executed);
            };
            action(ctx)?;
            executed += 1;
        }
    }

    /// Stops accepting actions and runs the ones already queued.
    pub fn close_and_drain(&self, ctx: &mut StageContext<'_>) -> Result<usize, PipelineError> {
        self.state().closed = true;
        self.drain(ctx)
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Announces an action that will reach this queue later.
    ///
    /// The owning stage does not terminate while reservations are alive.
    pub fn reserve(&self) -> InFlight {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight {
            shared: self.shared.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PortActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("PortActionQueue")
            .field("queued", &state.actions.len())
            .field("closed", &state.closed)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Reservation returned by [`PortActionQueue::reserve`], released on drop.
pub struct InFlight {
    shared: Arc<Shared>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InFlight")
    }
}
