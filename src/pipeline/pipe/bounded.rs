use super::strategy::{InsertionStrategy, SleepIfFull};
use super::{MonitorablePipe, Pipe, PipeKind, Token, Traffic};
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::PortId;
use crate::pipeline::signal::Signal;
use crate::pipeline::state::StageHandle;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Bounded single-producer/single-consumer pipe between two threads.
///
/// Preserves FIFO order. A blocking `add` polls with the configured
/// [`InsertionStrategy`] (sleep-if-full by default).
pub struct BoundedPipe {
    source: PortId,
    target: PortId,
    target_stage: StageHandle,
    capacity: usize,
    tx: Sender<Token>,
    rx: Receiver<Token>,
    signal_tx: Sender<Signal>,
    signal_rx: Receiver<Signal>,
    strategy: Box<dyn InsertionStrategy>,
    traffic: Traffic,
    closed: AtomicBool,
}

impl BoundedPipe {
    pub fn new(source: PortId, target: PortId, target_stage: StageHandle, capacity: usize) -> Self {
        Self::with_strategy(
            source,
            target,
            target_stage,
            capacity,
            Box::new(SleepIfFull::default()),
        )
    }

    pub fn with_strategy(
        source: PortId,
        target: PortId,
        target_stage: StageHandle,
        capacity: usize,
        strategy: Box<dyn InsertionStrategy>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        Self {
            source,
            target,
            target_stage,
            capacity,
            tx,
            rx,
            signal_tx,
            signal_rx,
            strategy,
            traffic: Traffic::default(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Pipe for BoundedPipe {
    fn kind(&self) -> PipeKind {
        PipeKind::BoundedSpsc
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
        self.strategy.insert(self, token)
    }

    fn add_non_blocking(&self, token: Token) -> Result<(), Token> {
        let is_element = !token.is_terminate();
        match self.tx.try_send(token) {
            Ok(()) => {
                if is_element {
                    self.traffic.record_push();
                }
                Ok(())
            }
            Err(TrySendError::Full(token)) | Err(TrySendError::Disconnected(token)) => Err(token),
        }
    }

    fn remove_last(&self) -> Option<Token> {
        let token = self.rx.try_recv().ok()?;
        if !token.is_terminate() {
            self.traffic.record_pull();
        }
        Some(token)
    }

    fn size(&self) -> usize {
        self.rx.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send_signal(&self, signal: Signal) {
        // Both ends are held by this pipe, so the channel never disconnects.
        let _ = self.signal_tx.send(signal);
    }

    fn take_signal(&self) -> Option<Signal> {
        self.signal_rx.try_recv().ok()
    }

    fn wait_for_signal(&self, timeout: Duration) -> Option<Signal> {
        self.signal_rx.recv_timeout(timeout).ok()
    }

    fn as_monitorable(&self) -> Option<&dyn MonitorablePipe> {
        Some(self)
    }
}

impl MonitorablePipe for BoundedPipe {
    fn num_pushes_since_start(&self) -> u64 {
        self.traffic.pushes()
    }

    fn num_pulls_since_start(&self) -> u64 {
        self.traffic.pulls()
    }

    fn push_throughput(&self) -> u64 {
        self.traffic.push_delta()
    }

    fn pull_throughput(&self) -> u64 {
        self.traffic.pull_delta()
    }

    fn num_waits(&self) -> u64 {
        self.strategy.num_waits()
    }
}

impl fmt::Debug for BoundedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedPipe")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::{PortDirection, StageId};
    use crate::pipeline::state::StageState;
    use proptest::prelude::*;

    fn pipe(capacity: usize) -> (BoundedPipe, StageHandle) {
        let target = StageHandle::new(StageId(1), "Collector-0".to_string(), 1, 0);
        let pipe = BoundedPipe::with_strategy(
            PortId::new(StageId(0), PortDirection::Output, 0),
            PortId::new(StageId(1), PortDirection::Input, 0),
            target.clone(),
            capacity,
            Box::new(SleepIfFull::new(Duration::from_millis(1))),
        );
        (pipe, target)
    }

    fn value(token: Token) -> u32 {
        match token {
            Token::Element(element) => *element.downcast::<u32>().unwrap(),
            Token::Terminate => panic!("unexpected terminate marker"),
        }
    }

    #[test]
    fn test_non_blocking_add_respects_capacity() {
        let (pipe, _) = pipe(3);
        for i in 0..3u32 {
            assert!(pipe.add_non_blocking(Token::element(i)).is_ok());
        }
        let rejected = pipe.add_non_blocking(Token::element(99u32)).unwrap_err();
        assert_eq!(value(rejected), 99);

        assert_eq!(value(pipe.remove_last().unwrap()), 0);
        assert!(pipe.add_non_blocking(Token::element(3u32)).is_ok());
        assert_eq!(pipe.size(), 3);
    }

    #[test]
    fn test_add_aborts_once_target_terminated() {
        let (pipe, target) = pipe(1);
        pipe.add(Token::element(1u32)).unwrap();
        target.change_state(StageState::Terminated).unwrap();
        let err = pipe.add(Token::element(2u32)).unwrap_err();
        assert!(err.is_terminate());
        assert!(pipe.num_waits() <= 1);
    }

    #[test]
    fn test_add_waits_for_consumer() {
        let (pipe, _) = pipe(1);
        let pipe = std::sync::Arc::new(pipe);
        pipe.add(Token::element(0u32)).unwrap();

        let consumer = {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                let mut received = Vec::new();
                while received.len() < 5 {
                    if let Some(token) = pipe.remove_last() {
                        received.push(value(token));
                    }
                }
                received
            })
        };
        for i in 1..5u32 {
            pipe.add(Token::element(i)).unwrap();
        }
        assert_eq!(consumer.join().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_throughput_counts_elements_only() {
        let (pipe, _) = pipe(8);
        pipe.add(Token::element(1u32)).unwrap();
        pipe.add(Token::element(2u32)).unwrap();
        pipe.add(Token::Terminate).unwrap();
        assert_eq!(pipe.push_throughput(), 2);
        assert_eq!(pipe.push_throughput(), 0);

        while pipe.remove_last().is_some() {}
        assert_eq!(pipe.num_pulls_since_start(), 2);
        assert_eq!(pipe.pull_throughput(), 2);
    }

    #[test]
    fn test_signals_are_separate_from_elements() {
        let (pipe, _) = pipe(1);
        pipe.send_signal(Signal::Starting);
        assert!(pipe.is_empty());
        assert_eq!(
            pipe.wait_for_signal(Duration::from_millis(10)),
            Some(Signal::Starting)
        );
        assert_eq!(pipe.take_signal(), None);
    }

    proptest! {
        #[test]
        fn prop_fifo_order(values in prop::collection::vec(any::<u32>(), 1..64)) {
            let (pipe, _) = pipe(values.len());
            for v in &values {
                prop_assert!(pipe.add_non_blocking(Token::element(*v)).is_ok());
            }
            let mut out = Vec::new();
            while let Some(token) = pipe.remove_last() {
                out.push(value(token));
            }
            prop_assert_eq!(out, values);
        }

        #[test]
        fn prop_capacity_is_exact(capacity in 1usize..32) {
            let (pipe, _) = pipe(capacity);
            for i in 0..capacity {
                prop_assert!(pipe.add_non_blocking(Token::element(i as u32)).is_ok());
            }
            prop_assert!(pipe.add_non_blocking(Token::element(0u32)).is_err());
            prop_assert!(pipe.remove_last().is_some());
            prop_assert!(pipe.add_non_blocking(Token::element(0u32)).is_ok());
        }
    }
}
