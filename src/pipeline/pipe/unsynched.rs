use super::{Pipe, PipeKind, Token};
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::PortId;
use crate::pipeline::signal::Signal;
use crate::pipeline::state::StageHandle;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Single-slot pipe between two stages executed by the same thread.
///
/// The thread delivers every element to the passive target right after it
/// was added, so the slot is empty again before the next `add`.
pub struct UnsynchedPipe {
    source: PortId,
    target: PortId,
    target_stage: StageHandle,
    slot: Mutex<Option<Token>>,
    signals: Mutex<VecDeque<Signal>>,
    closed: AtomicBool,
}

impl UnsynchedPipe {
    pub fn new(source: PortId, target: PortId, target_stage: StageHandle) -> Self {
        Self {
            source,
            target,
            target_stage,
            slot: Mutex::new(None),
            signals: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Token>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn signals(&self) -> std::sync::MutexGuard<'_, VecDeque<Signal>> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Pipe for UnsynchedPipe {
    fn kind(&self) -> PipeKind {
        PipeKind::Unsynched
    }

    fn source_port(&self) -> PortId {
        self.source
    }

    fn target_port(&self) -> PortId {
        self.target
    }

    fn target_stage(&self) -> Option<&StageHandle> {
        Some(&self.target_stage)
    }

    fn add(&self, token: Token) -> Result<(), PipelineError> {
        self.add_non_blocking(token)
            .map_err(|_| PipelineError::SlotOccupied(self.target))
    }

    fn add_non_blocking(&self, token: Token) -> Result<(), Token> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(token);
        }
        *slot = Some(token);
        Ok(())
    }

    fn remove_last(&self) -> Option<Token> {
        self.slot().take()
    }

    fn size(&self) -> usize {
        usize::from(self.slot().is_some())
    }

    fn capacity(&self) -> usize {
        1
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send_signal(&self, signal: Signal) {
        self.signals().push_back(signal);
    }

    fn take_signal(&self) -> Option<Signal> {
        self.signals().pop_front()
    }
}

impl fmt::Debug for UnsynchedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsynchedPipe")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("occupied", &(self.size() == 1))
            .finish()
    }
}
