//! Pipe-and-filter execution model.
//!
//! Stages are wired into a directed graph through typed ports. Each
//! connection becomes a pipe carrying elements and control signals. Active
//! stages run on a thread of their own; passive stages are executed inline by
//! the thread of the active stage that reaches them.
//!
//! # Architecture
//!
//! ```text
//! [Producer] ──► [Transformer] ──► [Distributor] ══► [Worker]* ══► [Merger] ══► [Collector]
//!     active        passive           passive          active        active        active
//! ```
//!
//! `──►` is an unsynchronized single-slot pipe, `══►` a bounded queue
//! between two threads.
//!
//! # Design
//!
//! - **Arena ownership**: stages live in a [`Configuration`] arena and are
//!   referenced by [`StageId`]; ports by a packed [`PortId`].
//! - **Thread domains**: validation colours every passive stage with the one
//!   active stage whose thread executes it.
//! - **Termination cascade**: terminate markers close pipes; the
//!   `Terminating` signal follows and is acknowledged exactly once per stage.
//! - **Cross-thread mutation**: ports are only added or removed by their
//!   owning stage, through closures queued for its next execution turn.

pub mod compiled_plan;
pub mod compiler;
pub mod configuration;
pub mod context;
pub mod error;
pub mod exception;
pub mod execution;
pub mod executor;
pub mod id;
pub mod pipe;
pub mod port;
pub mod runtime;
pub mod signal;
pub mod stage;
pub mod state;

pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::PipelineCompiler;
pub use configuration::{Configuration, Connection, InstanceCounter, StageBuilder};
pub use context::StageContext;
pub use error::{PipelineError, PipelineResult, ValidationIssue, ValidationReport};
pub use exception::{
    ExceptionListener, ExceptionPolicy, ExceptionReporter, FurtherExecution,
    IgnoringExceptionListener, LoggedException, TerminatingExceptionListener,
};
pub use execution::{Execution, ExecutionReport};
pub use executor::ThreadDomain;
pub use id::{PipeId, PortDirection, PortId, StageId};
pub use pipe::{
    Element, MonitorablePipe, Pipe, PipeKind, SynchedPipeKind, Token,
};
pub use port::{InputPort, OutputPort, PortDescriptor, PortType};
pub use runtime::{RuntimeHandle, RuntimeService, ServiceContext};
pub use signal::{Signal, TriggerPolicy};
pub use stage::{Stage, StageDeclaration, StageSlot};
pub use state::{StageHandle, StageState};
