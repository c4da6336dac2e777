use crate::pipeline::error::ValidationIssue;
use crate::pipeline::executor::ThreadDomain;
use crate::pipeline::id::{PortId, StageId};
use crate::pipeline::pipe::Pipe;
use crate::pipeline::runtime::{RuntimeHandle, RuntimeService};
use crate::pipeline::state::StageHandle;
use std::collections::HashMap;
use std::sync::Arc;

/// A validated configuration, ready to be started.
pub struct CompiledPlan {
    /// Shared state of the execution
    pub(crate) runtime: RuntimeHandle,

    /// One domain per active stage, keyed by that stage
    pub(crate) domains: Vec<(StageId, ThreadDomain)>,

    /// Instantiated pipes keyed by their target port
    pub(crate) pipes: HashMap<PortId, Arc<dyn Pipe>>,

    /// Handles of every declared stage, in declaration order
    pub(crate) handles: Vec<StageHandle>,

    /// Services registered on the configuration
    pub(crate) services: Vec<Box<dyn RuntimeService>>,

    /// Problems that did not reject the configuration
    pub warnings: Vec<ValidationIssue>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    /// Total number of declared stages
    pub total_stages: usize,

    /// Stages running on a thread of their own
    pub active_stages: usize,

    /// Stages executed inline by an active stage's thread
    pub passive_stages: usize,

    /// Passive stages no active stage reaches
    pub unreachable_stages: usize,

    /// Number of declared connections
    pub connections: usize,

    /// Connections crossing a thread boundary
    pub synched_pipes: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn stage_handles(&self) -> &[StageHandle] {
        &self.handles
    }

    pub fn thread_count(&self) -> usize {
        self.domains.len()
    }
}

impl std::fmt::Debug for CompiledPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPlan")
            .field("threads", &self.domains.len())
            .field("pipes", &self.pipes.len())
            .field("warnings", &self.warnings)
            .field("stats", &self.stats)
            .finish()
    }
}
