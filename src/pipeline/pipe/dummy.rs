use super::{Pipe, PipeKind, Token};
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::PortId;
use crate::pipeline::signal::Signal;
use crate::pipeline::state::StageHandle;

/// Placeholder attached to ports that were never connected.
///
/// Output written to it is discarded with a trace message; reads always find
/// it empty. Dummy inputs do not count as open inputs of their stage.
#[derive(Debug)]
pub struct DummyPipe {
    port: PortId,
}

impl DummyPipe {
    pub fn new(port: PortId) -> Self {
        Self { port }
    }
}

impl Pipe for DummyPipe {
    fn kind(&self) -> PipeKind {
        PipeKind::Dummy
    }

    fn source_port(&self) -> PortId {
        self.port
    }

    fn target_port(&self) -> PortId {
        self.port
    }

    fn target_stage(&self) -> Option<&StageHandle> {
        None
    }

    fn add(&self, token: Token) -> Result<(), PipelineError> {
        if !token.is_terminate() {
            tracing::trace!("Dropping element sent to unconnected {:?}", self.port);
        }
        Ok(())
    }

    fn add_non_blocking(&self, token: Token) -> Result<(), Token> {
        let _ = self.add(token);
        Ok(())
    }

    fn remove_last(&self) -> Option<Token> {
        None
    }

    fn size(&self) -> usize {
        0
    }

    fn capacity(&self) -> usize {
        1
    }

    fn close(&self) {}

    fn is_closed(&self) -> bool {
        true
    }

    fn send_signal(&self, _signal: Signal) {}

    fn take_signal(&self) -> Option<Signal> {
        None
    }
}
