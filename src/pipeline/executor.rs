//! Per-thread execution of stages.
//!
//! Every active stage owns one [`ThreadDomain`]: the stage itself plus the
//! passive stages reachable from it through unsynchronized pipes. Passive
//! stages are executed inline whenever an element or a signal is delivered
//! to them.
//!
//! # Runner
//!
//! 1. Wait for `Starting` on every connected input (producers start at once).
//! 2. Loop the guarded execution step until the stage is terminating or its
//!    thread has been interrupted.
//! 3. Deliver `Terminating` to every input port.

use crate::pipeline::context::StageContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::exception::FurtherExecution;
use crate::pipeline::id::{PortId, StageId};
use crate::pipeline::pipe::{Pipe, Token};
use crate::pipeline::runtime::RuntimeHandle;
use crate::pipeline::signal::{Signal, SignalOutcome};
use crate::pipeline::stage::StageSlot;
use crate::pipeline::state::StageState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Stages executed by one thread.
pub struct ThreadDomain {
    runtime: RuntimeHandle,
    slots: HashMap<StageId, StageSlot>,
}

impl ThreadDomain {
    pub(crate) fn new(runtime: RuntimeHandle) -> Self {
        Self {
            runtime,
            slots: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, slot: StageSlot) {
        self.slots.insert(slot.id(), slot);
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Executes a passive stage after an element was added to one of its inputs.
    ///
    /// A stage that is currently executing further up the call stack is
    /// skipped; it picks the element up on its next turn.
    pub(crate) fn on_element_added(&mut self, stage: StageId) -> Result<(), PipelineError> {
        let Some(mut slot) = self.slots.remove(&stage) else {
            return Ok(());
        };
        let result = self.run_step(&mut slot);
        self.slots.insert(stage, slot);
        result
    }

    /// Delivers the oldest queued signal of an unsynchronized pipe to its target.
    pub(crate) fn on_signal_added(&mut self, pipe: &Arc<dyn Pipe>) -> Result<(), PipelineError> {
        let target = pipe.target_port();
        let Some(mut slot) = self.slots.remove(&target.stage()) else {
            return Ok(());
        };
        let result = match pipe.take_signal() {
            Some(signal) => self.deliver_signal(&mut slot, signal, Some(target)),
            None => Ok(()),
        };
        self.slots.insert(target.stage(), slot);
        result
    }

    /// One guarded turn: execute, route failures, check for termination, flush.
    pub(crate) fn run_step(&mut self, slot: &mut StageSlot) -> Result<(), PipelineError> {
        if slot.core.state() < StageState::Terminating {
            let result = {
                let mut ctx = StageContext::new(&mut slot.core, self);
                slot.stage.execute(&mut ctx)
            };
            if let Err(err) = result {
                match err.downcast::<PipelineError>() {
                    Ok(fault) => return Err(fault),
                    Err(err) => {
                        let verdict = self.runtime.exceptions().report(&err, slot.name());
                        if verdict == FurtherExecution::Terminate {
                            return Err(PipelineError::Terminate);
                        }
                    }
                }
            }
        }

        if slot.core.state() < StageState::Terminating && slot.core.inputs_exhausted() {
            let ready = {
                let mut ctx = StageContext::new(&mut slot.core, self);
                slot.stage.ready_to_terminate(&mut ctx)?
            };
            if ready && slot.core.inputs_exhausted() {
                slot.core.terminate()?;
            }
        }

        if slot.core.state() >= StageState::Terminating {
            self.flush(slot)?;
        }
        Ok(())
    }

    /// Closes every output port of a terminating stage with a terminate marker.
    fn flush(&mut self, slot: &mut StageSlot) -> Result<(), PipelineError> {
        if slot.core.outputs_closed() {
            return Ok(());
        }
        slot.core.mark_outputs_closed();
        for pipe in slot.core.output_pipes() {
            match pipe.add(Token::Terminate) {
                Ok(()) => {
                    if !pipe.kind().is_synched() {
                        if let Some(target) = pipe.target_stage() {
                            self.on_element_added(target.id())?;
                        }
                    }
                }
                Err(PipelineError::Terminate) => {
                    tracing::trace!(
                        "{}: terminate marker into {:?} not delivered",
                        slot.name(),
                        pipe.target_port()
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Acknowledges `signal` arriving on `port` and triggers it once complete.
    pub(crate) fn deliver_signal(
        &mut self,
        slot: &mut StageSlot,
        signal: Signal,
        port: Option<PortId>,
    ) -> Result<(), PipelineError> {
        let required = slot.core.connected_input_indices();
        let outcome = slot
            .core
            .signals
            .acknowledge(signal, port.map(PortId::port_index), &required);

        match outcome {
            SignalOutcome::Trigger => {}
            SignalOutcome::Duplicate => {
                tracing::warn!(
                    "{}: received {} twice from {:?}",
                    slot.name(),
                    signal,
                    port
                );
                return Ok(());
            }
            SignalOutcome::Pending | SignalOutcome::AlreadyTriggered => {
                tracing::trace!("{}: {} from {:?} noted", slot.name(), signal, port);
                return Ok(());
            }
        }

        tracing::trace!("{}: triggering {}", slot.name(), signal);
        if signal == Signal::Terminating {
            // Markers always precede the Terminating signal downstream.
            slot.core.terminate()?;
            self.flush(slot)?;
        }

        slot.core.hooks.reset(signal);
        let result = {
            let mut ctx = StageContext::new(&mut slot.core, self);
            match signal {
                Signal::Starting => slot.stage.on_starting(&mut ctx),
                Signal::Terminating => slot.stage.on_terminating(&mut ctx),
            }
        };
        let hook = match signal {
            Signal::Starting => "on_starting",
            Signal::Terminating => "on_terminating",
        };
        if let Err(err) = result {
            return Err(match err.downcast::<PipelineError>() {
                Ok(fault) => fault,
                Err(err) => PipelineError::Hook {
                    stage: slot.name().to_string(),
                    hook,
                    message: format!("{err:#}"),
                },
            });
        }
        if !slot.core.hooks.was_called(signal) {
            return Err(PipelineError::SuperNotCalled {
                stage: slot.name().to_string(),
                hook,
            });
        }

        for pipe in slot.core.output_pipes() {
            pipe.send_signal(signal);
            if !pipe.kind().is_synched() {
                self.on_signal_added(&pipe)?;
            }
        }
        Ok(())
    }

    /// Runs the active stage `root` of this domain to completion.
    pub(crate) fn run(mut self, root: StageId) -> Result<(), PipelineError> {
        let mut slot = self
            .slots
            .remove(&root)
            .ok_or(PipelineError::UnknownStage(root))?;
        if let Some(interrupt) = slot.handle().interrupt() {
            interrupt.install_current();
        }
        tracing::debug!(
            "Thread of {} started ({} passive stages)",
            slot.name(),
            self.slots.len()
        );

        let outcome = match self.drive(&mut slot) {
            Ok(()) => Ok(()),
            Err(PipelineError::Terminate) => {
                tracing::debug!("{}: terminated by request", slot.name());
                slot.handle().abort();
                self.runtime.on_terminate();
                self.terminate_by_framework(&mut slot)
            }
            Err(fault) => {
                tracing::error!("{}: {}", slot.name(), fault);
                self.runtime.on_terminate();
                if let Err(err) = self.terminate_by_framework(&mut slot) {
                    tracing::trace!("{}: {}", slot.name(), err);
                }
                Err(fault)
            }
        };

        let signalled = self.signal_termination(&mut slot);
        tracing::debug!("Thread of {} stopped in {}", slot.name(), slot.core.state());
        outcome.and(signalled)
    }

    fn drive(&mut self, slot: &mut StageSlot) -> Result<(), PipelineError> {
        if !self.await_start(slot)? {
            return self.terminate_by_framework(slot);
        }
        let mut idle = IdleBackoff::new(Duration::from_millis(
            self.runtime.config().start_signal_poll_ms,
        ));
        while slot.core.state() < StageState::Terminating {
            if slot.handle().is_aborted() {
                return self.terminate_by_framework(slot);
            }
            self.run_step(slot)?;
            if slot.core.take_received() == 0 && !slot.core.is_producer() {
                idle.wait();
            } else {
                idle.reset();
            }
        }
        Ok(())
    }

    /// Waits for `Starting` on every connected input. `false` if interrupted first.
    fn await_start(&mut self, slot: &mut StageSlot) -> Result<bool, PipelineError> {
        let pipes = slot.core.connected_input_pipes();
        if pipes.is_empty() {
            self.deliver_signal(slot, Signal::Starting, None)?;
            return Ok(true);
        }

        let poll = Duration::from_millis(self.runtime.config().start_signal_poll_ms.max(1));
        for pipe in pipes {
            loop {
                if slot.handle().is_aborted() {
                    return Ok(false);
                }
                match pipe.wait_for_signal(poll) {
                    Some(Signal::Starting) => {
                        self.deliver_signal(slot, Signal::Starting, Some(pipe.target_port()))?;
                        break;
                    }
                    Some(other) => {
                        tracing::trace!("{}: ignoring {} before start", slot.name(), other)
                    }
                    None => {}
                }
            }
        }
        Ok(true)
    }

    fn terminate_by_framework(&mut self, slot: &mut StageSlot) -> Result<(), PipelineError> {
        slot.core.terminate()?;
        self.flush(slot)
    }

    /// Synthesizes `Terminating` on every input port of the root stage.
    fn signal_termination(&mut self, slot: &mut StageSlot) -> Result<(), PipelineError> {
        let inputs: Vec<PortId> = slot
            .core
            .connected_input_pipes()
            .iter()
            .map(|pipe| pipe.target_port())
            .collect();
        if inputs.is_empty() {
            return self.deliver_signal(slot, Signal::Terminating, None);
        }
        for port in inputs {
            self.deliver_signal(slot, Signal::Terminating, Some(port))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ThreadDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDomain")
            .field("stages", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Paces an active stage whose inputs stayed empty.
///
/// The first idle turns only yield. Afterwards the thread parks for a delay
/// that doubles from [`IdleBackoff::FIRST_PARK`] up to at most 1 ms (or the
/// start signal poll interval, if shorter).
#[derive(Debug)]
struct IdleBackoff {
    idle_turns: u32,
    max: Duration,
}

impl IdleBackoff {
    const YIELD_TURNS: u32 = 64;
    const FIRST_PARK: Duration = Duration::from_micros(20);
    const MAX_PARK: Duration = Duration::from_millis(1);

    fn new(poll: Duration) -> Self {
        Self {
            idle_turns: 0,
            max: poll.min(Self::MAX_PARK).max(Self::FIRST_PARK),
        }
    }

    fn delay(&self) -> Option<Duration> {
        let parked = self.idle_turns.checked_sub(Self::YIELD_TURNS)?;
        Some((Self::FIRST_PARK * 2u32.pow(parked.min(10))).min(self.max))
    }

    fn wait(&mut self) {
        match self.delay() {
            None => std::thread::yield_now(),
            Some(delay) => std::thread::park_timeout(delay),
        }
        self.idle_turns = self.idle_turns.saturating_add(1);
    }

    fn reset(&mut self) {
        self.idle_turns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_backoff_yields_then_parks_up_to_the_cap() {
        let mut idle = IdleBackoff::new(Duration::from_millis(50));
        idle.idle_turns = IdleBackoff::YIELD_TURNS - 1;
        assert_eq!(idle.delay(), None);

        idle.idle_turns += 1;
        assert_eq!(idle.delay(), Some(Duration::from_micros(20)));
        idle.idle_turns += 3;
        assert_eq!(idle.delay(), Some(Duration::from_micros(160)));
        idle.idle_turns = u32::MAX;
        assert_eq!(idle.delay(), Some(Duration::from_millis(1)));

        idle.reset();
        assert_eq!(idle.delay(), None);
    }

    #[test]
    fn test_idle_backoff_respects_short_poll_interval() {
        let mut idle = IdleBackoff::new(Duration::from_micros(100));
        idle.idle_turns = u32::MAX;
        assert_eq!(idle.delay(), Some(Duration::from_micros(100)));
    }
}
