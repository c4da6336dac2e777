//! Insertion strategies used by bounded pipes when they are full.

use super::{Pipe, Token};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::{Interrupt, StageState};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default pause between two insert attempts into a full pipe.
pub const DEFAULT_SLEEP_IF_FULL: Duration = Duration::from_millis(10);

/// How a blocking insert behaves while the pipe is full.
pub trait InsertionStrategy: Send + Sync + fmt::Debug {
    fn insert(&self, pipe: &dyn Pipe, token: Token) -> Result<(), PipelineError>;

    fn num_waits(&self) -> u64 {
        0
    }
}

/// The insert cannot succeed anymore: the target stopped reading or the
/// calling thread was interrupted.
fn insert_aborted(pipe: &dyn Pipe) -> bool {
    let target_gone = pipe
        .target_stage()
        .is_some_and(|stage| stage.state() == StageState::Terminated);
    target_gone || Interrupt::current_is_set()
}

/// Polls the pipe, sleeping between attempts.
#[derive(Debug)]
pub struct SleepIfFull {
    sleep: Duration,
    waits: AtomicU64,
}

impl SleepIfFull {
    pub fn new(sleep: Duration) -> Self {
        Self {
            sleep,
            waits: AtomicU64::new(0),
        }
    }
}

impl Default for SleepIfFull {
    fn default() -> Self {
        Self::new(DEFAULT_SLEEP_IF_FULL)
    }
}

impl InsertionStrategy for SleepIfFull {
    fn insert(&self, pipe: &dyn Pipe, token: Token) -> Result<(), PipelineError> {
        let mut token = token;
        loop {
            match pipe.add_non_blocking(token) {
                Ok(()) => return Ok(()),
                Err(rejected) => token = rejected,
            }
            if insert_aborted(pipe) {
                tracing::trace!("Insert into {:?} aborted", pipe.target_port());
                return Err(PipelineError::Terminate);
            }
            self.waits.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(self.sleep);
        }
    }

    fn num_waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}

/// Retries immediately without ever sleeping.
#[derive(Debug, Default)]
pub struct BusySpin;

impl InsertionStrategy for BusySpin {
    fn insert(&self, pipe: &dyn Pipe, token: Token) -> Result<(), PipelineError> {
        let mut token = token;
        loop {
            match pipe.add_non_blocking(token) {
                Ok(()) => return Ok(()),
                Err(rejected) => token = rejected,
            }
            if insert_aborted(pipe) {
                return Err(PipelineError::Terminate);
            }
            std::hint::spin_loop();
        }
    }
}
