use super::strategy::{BusySpin, InsertionStrategy};
use super::{MonitorablePipe, Pipe, PipeKind, Token, Traffic};
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::PortId;
use crate::pipeline::signal::Signal;
use crate::pipeline::state::StageHandle;
use crossbeam_channel::{Receiver, Sender};
use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Bounded multi-producer/multi-consumer pipe.
///
/// Only the order of elements from the same producer is preserved. A blocking
/// `add` busy-spins on the queue instead of sleeping.
pub struct MpmcPipe {
    source: PortId,
    target: PortId,
    target_stage: StageHandle,
    queue: ArrayQueue<Token>,
    signal_tx: Sender<Signal>,
    signal_rx: Receiver<Signal>,
    strategy: BusySpin,
    traffic: Traffic,
    closed: AtomicBool,
}

impl MpmcPipe {
    pub fn new(source: PortId, target: PortId, target_stage: StageHandle, capacity: usize) -> Self {
        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        Self {
            source,
            target,
            target_stage,
            queue: ArrayQueue::new(capacity.max(1)),
            signal_tx,
            signal_rx,
            strategy: BusySpin,
            traffic: Traffic::default(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Pipe for MpmcPipe {
    fn kind(&self) -> PipeKind {
        PipeKind::BoundedMpmc
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
        self.queue.push(token)?;
        if is_element {
            self.traffic.record_push();
        }
        Ok(())
    }

    fn remove_last(&self) -> Option<Token> {
        let token = self.queue.pop()?;
        if !token.is_terminate() {
            self.traffic.record_pull();
        }
        Some(token)
    }

    fn size(&self) -> usize {
        self.queue.len()
    }

    fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send_signal(&self, signal: Signal) {
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

impl MonitorablePipe for MpmcPipe {
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
        0
    }
}

impl fmt::Debug for MpmcPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcPipe")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::{PortDirection, StageId};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn pipe(capacity: usize) -> MpmcPipe {
        MpmcPipe::new(
            PortId::new(StageId(0), PortDirection::Output, 0),
            PortId::new(StageId(1), PortDirection::Input, 0),
            StageHandle::new(StageId(1), "Collector-0".to_string(), 1, 0),
            capacity,
        )
    }

    #[test]
    fn test_capacity_and_rejection() {
        let pipe = pipe(2);
        assert!(pipe.add_non_blocking(Token::element(1u8)).is_ok());
        assert!(pipe.add_non_blocking(Token::element(2u8)).is_ok());
        assert!(pipe.add_non_blocking(Token::element(3u8)).is_err());
        assert!(pipe.remove_last().is_some());
        assert!(pipe.add_non_blocking(Token::element(3u8)).is_ok());
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let pipe = Arc::new(pipe(4));
        let producers: Vec<_> = (0..3u32)
            .map(|p| {
                let pipe = pipe.clone();
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        pipe.add(Token::element(p * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        while seen.len() < 300 {
            if let Some(Token::Element(element)) = pipe.remove_last() {
                assert!(seen.insert(*element.downcast::<u32>().unwrap()));
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(pipe.num_pushes_since_start(), 300);
    }
}
