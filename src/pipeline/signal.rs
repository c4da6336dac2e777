//! Control signals and per-stage acknowledgement bookkeeping.
//!
//! Signals travel along the same pipes as elements. A stage triggers each
//! signal kind at most once; the [`TriggerPolicy`] decides how many input
//! ports must have delivered the signal before the trigger fires.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// When a signal arriving on an input port triggers its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// The first arrival on any port triggers.
    FirstArrival,
    /// Every connected input port must have delivered the signal.
    AllInputs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Starting,
    Terminating,
}

impl Signal {
    pub fn trigger_policy(self) -> TriggerPolicy {
        match self {
            Signal::Starting => TriggerPolicy::FirstArrival,
            Signal::Terminating => TriggerPolicy::AllInputs,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Starting => "Starting",
            Signal::Terminating => "Terminating",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of acknowledging one signal arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The stage must run its hook and forward the signal.
    Trigger,
    /// More input ports have to deliver the signal first.
    Pending,
    /// This port already delivered the signal.
    Duplicate,
    /// The signal kind was already triggered through another port.
    AlreadyTriggered,
}

/// Which signals a stage has seen, and from which ports.
///
/// `None` stands for a signal synthesized by the framework rather than
/// delivered through a port (producers have no input ports to deliver it).
#[derive(Debug, Default)]
pub struct SignalTable {
    triggered: HashSet<Signal>,
    acks: HashMap<Signal, HashSet<Option<u16>>>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the arrival of `signal` on `port`.
    ///
    /// `required` lists the input port indices that must acknowledge an
    /// [`TriggerPolicy::AllInputs`] signal.
    pub fn acknowledge(
        &mut self,
        signal: Signal,
        port: Option<u16>,
        required: &[u16],
    ) -> SignalOutcome {
        if self.triggered.contains(&signal) {
            return SignalOutcome::AlreadyTriggered;
        }

        let acks = self.acks.entry(signal).or_default();
        if !acks.insert(port) {
            return SignalOutcome::Duplicate;
        }

        let complete = match signal.trigger_policy() {
            TriggerPolicy::FirstArrival => true,
            TriggerPolicy::AllInputs => {
                port.is_none() || required.iter().all(|index| acks.contains(&Some(*index)))
            }
        };

        if complete {
            self.triggered.insert(signal);
            SignalOutcome::Trigger
        } else {
            SignalOutcome::Pending
        }
    }

    /// Drops the acknowledgements of a removed input port, so that a port
    /// later attached at the same index starts afresh.
    pub fn forget_port(&mut self, port: u16) {
        for acks in self.acks.values_mut() {
            acks.remove(&Some(port));
        }
    }

    pub fn is_triggered(&self, signal: Signal) -> bool {
        self.triggered.contains(&signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_triggers_on_first_arrival() {
        let mut table = SignalTable::new();
        assert_eq!(
            table.acknowledge(Signal::Starting, Some(0), &[0, 1]),
            SignalOutcome::Trigger
        );
        assert_eq!(
            table.acknowledge(Signal::Starting, Some(1), &[0, 1]),
            SignalOutcome::AlreadyTriggered
        );
    }

    #[test]
    fn test_terminating_waits_for_all_inputs() {
        let mut table = SignalTable::new();
        assert_eq!(
            table.acknowledge(Signal::Terminating, Some(1), &[0, 1, 2]),
            SignalOutcome::Pending
        );
        assert_eq!(
            table.acknowledge(Signal::Terminating, Some(1), &[0, 1, 2]),
            SignalOutcome::Duplicate
        );
        assert_eq!(
            table.acknowledge(Signal::Terminating, Some(0), &[0, 1, 2]),
            SignalOutcome::Pending
        );
        assert_eq!(
            table.acknowledge(Signal::Terminating, Some(2), &[0, 1, 2]),
            SignalOutcome::Trigger
        );
        assert!(table.is_triggered(Signal::Terminating));
    }

    #[test]
    fn test_forgotten_port_must_acknowledge_again() {
        let mut table = SignalTable::new();
        table.acknowledge(Signal::Terminating, Some(1), &[0, 1]);
        table.forget_port(1);
        assert_eq!(
            table.acknowledge(Signal::Terminating, Some(0), &[0, 1]),
            SignalOutcome::Pending
        );
        assert_eq!(
            table.acknowledge(Signal::Terminating, Some(1), &[0, 1]),
            SignalOutcome::Trigger
        );
    }

    #[test]
    fn test_synthesized_signal_triggers_immediately() {
        let mut table = SignalTable::new();
        assert_eq!(
            table.acknowledge(Signal::Terminating, None, &[]),
            SignalOutcome::Trigger
        );
    }
}
