//! Stage lifecycle state and the shared stage handle.
//!
//! The lifecycle is strictly monotonic:
//! `Created → Validated → Started → Terminating → Terminated`.
//! States may be skipped (an aborted stage can go from `Validated` straight to
//! `Terminating`) but never revisited.

use crate::pipeline::error::PipelineError;
use crate::pipeline::id::{PortDirection, PortId, StageId};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StageState {
    Created = 0,
    Validated = 1,
    Started = 2,
    Terminating = 3,
    Terminated = 4,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Created,
            1 => StageState::Validated,
            2 => StageState::Started,
            3 => StageState::Terminating,
            _ => StageState::Terminated,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageState::Created => "CREATED",
            StageState::Validated => "VALIDATED",
            StageState::Started => "STARTED",
            StageState::Terminating => "TERMINATING",
            StageState::Terminated => "TERMINATED",
        }
    }
}

impl Serialize for StageState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

thread_local! {
    static CURRENT_INTERRUPT: RefCell<Option<Interrupt>> = const { RefCell::new(None) };
}

/// Interruption flag of one stage thread.
///
/// Every stage executed on a thread shares that thread's flag, so aborting
/// any of them interrupts the whole thread.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Makes this flag the one observed by [`Interrupt::current_is_set`] on the calling thread.
    pub fn install_current(&self) {
        CURRENT_INTERRUPT.with(|current| *current.borrow_mut() = Some(self.clone()));
    }

    /// Whether the calling thread's stage flag has been raised.
    pub fn current_is_set() -> bool {
        CURRENT_INTERRUPT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map(Interrupt::is_set)
                .unwrap_or(false)
        })
    }
}

/// Port indices of one direction: never used ones above `next`, released
/// ones in `free`.
#[derive(Debug)]
struct PortIndexPool {
    next: u16,
    free: BTreeSet<u16>,
}

impl PortIndexPool {
    fn new(declared: u16) -> Self {
        Self {
            next: declared,
            free: BTreeSet::new(),
        }
    }

    fn reserve(&mut self) -> Option<u16> {
        if let Some(index) = self.free.pop_first() {
            return Some(index);
        }
        if self.next >= PortId::MAX_PORTS {
            return None;
        }
        self.next += 1;
        Some(self.next - 1)
    }

    fn release(&mut self, index: u16) {
        if index < self.next {
            self.free.insert(index);
        }
    }

    fn in_use(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

struct HandleInner {
    id: StageId,
    name: String,
    state: AtomicU8,
    interrupt: OnceLock<Interrupt>,
    inputs: Mutex<PortIndexPool>,
    outputs: Mutex<PortIndexPool>,
}

/// Cheap, cloneable, thread-safe view of a stage.
///
/// The stage itself lives on exactly one thread; everything other threads may
/// need (its state, abort, port index reservation) goes through this handle.
#[derive(Clone)]
pub struct StageHandle(Arc<HandleInner>);

impl StageHandle {
    pub(crate) fn new(id: StageId, name: String, num_inputs: u16, num_outputs: u16) -> Self {
        Self(Arc::new(HandleInner {
            id,
            name,
            state: AtomicU8::new(StageState::Created as u8),
            interrupt: OnceLock::new(),
            inputs: Mutex::new(PortIndexPool::new(num_inputs)),
            outputs: Mutex::new(PortIndexPool::new(num_outputs)),
        }))
    }

    pub fn id(&self) -> StageId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.0.state.load(Ordering::Acquire))
    }

    /// Moves the stage forward to `next`.
    pub(crate) fn change_state(&self, next: StageState) -> Result<(), PipelineError> {
        let mut current = self.0.state.load(Ordering::Acquire);
        loop {
            if next as u8 <= current {
                return Err(PipelineError::IllegalStateChange {
                    stage: self.0.name.clone(),
                    from: StageState::from_u8(current).name(),
                    to: next.name(),
                });
            }
            match self.0.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::trace!(
                        "{}: {} -> {}",
                        self.0.name,
                        StageState::from_u8(current),
                        next
                    );
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn assign_interrupt(&self, interrupt: Interrupt) {
        if self.0.interrupt.set(interrupt).is_err() {
            tracing::warn!("{} is already bound to a thread", self.0.name);
        }
    }

    pub(crate) fn interrupt(&self) -> Option<&Interrupt> {
        self.0.interrupt.get()
    }

    /// Interrupts the thread executing this stage, forcing its termination.
    pub fn abort(&self) {
        if let Some(interrupt) = self.0.interrupt.get() {
            interrupt.set();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.0.interrupt.get().is_some_and(Interrupt::is_set)
    }

    fn pool(&self, direction: PortDirection) -> MutexGuard<'_, PortIndexPool> {
        let pool = match direction {
            PortDirection::Input => &self.0.inputs,
            PortDirection::Output => &self.0.outputs,
        };
        pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserves a port index that will be attached later by the stage's own thread.
    ///
    /// Indices of removed ports are reused, lowest first.
    pub fn reserve_port(&self, direction: PortDirection) -> Result<u16, PipelineError> {
        self.pool(direction)
            .reserve()
            .ok_or_else(|| PipelineError::PortLimitReached {
                stage: self.0.name.clone(),
                direction,
                max: PortId::MAX_PORTS,
            })
    }

    pub fn reserve_input_port(&self) -> Result<u16, PipelineError> {
        self.reserve_port(PortDirection::Input)
    }

    pub fn reserve_output_port(&self) -> Result<u16, PipelineError> {
        self.reserve_port(PortDirection::Output)
    }

    /// Hands the index of a removed (or never attached) port back for reuse.
    pub fn release_port(&self, id: PortId) {
        if id.stage() == self.0.id {
            self.pool(id.direction()).release(id.port_index());
        }
    }

    /// Port indices currently declared, attached or reserved.
    pub fn ports_in_use(&self, direction: PortDirection) -> usize {
        self.pool(direction).in_use()
    }
}

impl fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHandle")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> StageHandle {
        StageHandle::new(StageId(0), "Collector-0".to_string(), 1, 0)
    }

    #[test]
    fn test_state_moves_forward() {
        let stage = handle();
        stage.change_state(StageState::Validated).unwrap();
        stage.change_state(StageState::Terminating).unwrap();
        assert_eq!(stage.state(), StageState::Terminating);
    }

    #[test]
    fn test_state_never_regresses() {
        let stage = handle();
        stage.change_state(StageState::Started).unwrap();
        let err = stage.change_state(StageState::Validated).unwrap_err();
        assert!(matches!(err, PipelineError::IllegalStateChange { .. }));
        assert!(stage.change_state(StageState::Started).is_err());
        assert_eq!(stage.state(), StageState::Started);
    }

    #[test]
    fn test_abort_sets_thread_interrupt() {
        let stage = handle();
        assert!(!stage.is_aborted());
        stage.abort();
        assert!(!stage.is_aborted());

        let interrupt = Interrupt::new();
        stage.assign_interrupt(interrupt.clone());
        stage.abort();
        assert!(interrupt.is_set());
        assert!(stage.is_aborted());
    }

    #[test]
    fn test_current_interrupt_is_thread_local() {
        let interrupt = Interrupt::new();
        interrupt.set();
        let other = std::thread::spawn(move || {
            let before = Interrupt::current_is_set();
            interrupt.install_current();
            (before, Interrupt::current_is_set())
        })
        .join()
        .unwrap();
        assert_eq!(other, (false, true));
        assert!(!Interrupt::current_is_set());
    }

    #[test]
    fn test_port_reservation_continues_after_declared_ports() {
        let stage = StageHandle::new(StageId(3), "Merger-0".to_string(), 2, 1);
        assert_eq!(stage.reserve_input_port().unwrap(), 2);
        assert_eq!(stage.reserve_input_port().unwrap(), 3);
        assert_eq!(stage.reserve_output_port().unwrap(), 1);
    }

    #[test]
    fn test_released_port_indices_are_reused_lowest_first() {
        let stage = StageHandle::new(StageId(3), "Distributor-0".to_string(), 1, 1);
        let reserved: Vec<u16> = (0..4).map(|_| stage.reserve_output_port().unwrap()).collect();
        assert_eq!(reserved, vec![1, 2, 3, 4]);

        stage.release_port(PortId::new(StageId(3), PortDirection::Output, 3));
        stage.release_port(PortId::new(StageId(3), PortDirection::Output, 2));
        // foreign and input ids leave the output pool alone
        stage.release_port(PortId::new(StageId(4), PortDirection::Output, 1));
        stage.release_port(PortId::new(StageId(3), PortDirection::Input, 0));

        assert_eq!(stage.ports_in_use(PortDirection::Output), 3);
        assert_eq!(stage.reserve_output_port().unwrap(), 2);
        assert_eq!(stage.reserve_output_port().unwrap(), 3);
        assert_eq!(stage.reserve_output_port().unwrap(), 5);
        assert_eq!(stage.ports_in_use(PortDirection::Input), 1);
    }

    #[test]
    fn test_reservation_fails_when_every_index_is_taken() {
        let stage = StageHandle::new(StageId(0), "Merger-0".to_string(), PortId::MAX_PORTS - 1, 0);
        assert_eq!(stage.reserve_input_port().unwrap(), PortId::MAX_PORTS - 1);
        assert!(matches!(
            stage.reserve_input_port(),
            Err(PipelineError::PortLimitReached { max: 4096, .. })
        ));

        stage.release_port(PortId::new(StageId(0), PortDirection::Input, 17));
        assert_eq!(stage.reserve_input_port().unwrap(), 17);
    }
}
