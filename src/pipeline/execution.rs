//! Starting, aborting and awaiting a configured pipeline.

use crate::pipeline::compiled_plan::{CompiledPlan, PlanStats};
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::configuration::Configuration;
use crate::pipeline::error::{PipelineError, ValidationIssue};
use crate::pipeline::exception::LoggedException;
use crate::pipeline::runtime::{RuntimeHandle, ServiceContext};
use crate::pipeline::state::{StageHandle, StageState};
use serde::Serialize;

/// Outcome of a finished execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Whether the execution was torn down before its stages finished on their own.
    pub aborted: bool,
    pub logged_exceptions: Vec<LoggedException>,
    pub stage_states: Vec<(String, StageState)>,
}

impl ExecutionReport {
    pub fn state_of(&self, stage: &str) -> Option<StageState> {
        self.stage_states
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, state)| *state)
    }
}

/// A validated pipeline and the threads running it.
///
/// ```no_run
/// # use stagepipe::pipeline::{Configuration, Execution};
/// # fn run(config: Configuration) -> Result<(), stagepipe::pipeline::PipelineError> {
/// let report = Execution::new(config)?.execute_blocking()?;
/// assert!(!report.aborted);
/// # Ok(())
/// # }
/// ```
pub struct Execution {
    runtime: RuntimeHandle,
    plan: Option<CompiledPlan>,
    warnings: Vec<ValidationIssue>,
    stats: PlanStats,
}

impl Execution {
    /// Validates `config`. Nothing runs yet.
    pub fn new(config: Configuration) -> Result<Self, PipelineError> {
        let plan = PipelineCompiler::compile(config)?;
        Ok(Self {
            runtime: plan.runtime.clone(),
            warnings: plan.warnings.clone(),
            stats: plan.stats.clone(),
            plan: Some(plan),
        })
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }

    /// Starts services and stage threads, then waits for all of them.
    pub fn execute_blocking(mut self) -> Result<ExecutionReport, PipelineError> {
        self.execute_non_blocking()?;
        self.wait_for_termination()
    }

    /// Starts services and stage threads and returns immediately.
    pub fn execute_non_blocking(&mut self) -> Result<(), PipelineError> {
        let Some(plan) = self.plan.take() else {
            tracing::warn!("Execution was already started");
            return Ok(());
        };
        let CompiledPlan {
            runtime,
            domains,
            pipes,
            handles,
            services,
            ..
        } = plan;

        let stages = handles
            .iter()
            .map(|handle| (handle.id(), handle.clone()))
            .collect();
        let service_ctx = ServiceContext::new(runtime.clone(), pipes, stages);
        for service in services {
            let name = service.name().to_string();
            service.start(&service_ctx)?;
            tracing::debug!("Started service {}", name);
        }

        tracing::info!(
            "Starting execution with {} threads, {} stages",
            domains.len(),
            handles.len()
        );
        for (root, domain) in domains {
            let name = handles
                .get(root.index())
                .map(|h: &StageHandle| h.name().to_string())
                .unwrap_or_else(|| format!("{root:?}"));
            runtime.spawn_domain(domain, root, name)?;
        }
        Ok(())
    }

    /// Asks every stage to terminate; returns without waiting.
    pub fn abort_eventually(&self) {
        self.runtime.on_terminate();
    }

    /// Waits for every stage thread, including those started at runtime.
    pub fn wait_for_termination(&mut self) -> Result<ExecutionReport, PipelineError> {
        if self.plan.is_some() {
            return Err(PipelineError::ExecutionFailed(vec![
                "execution was never started".to_string(),
            ]));
        }
        let mut failures = self.runtime.join_stages();
        self.runtime.shutdown();
        failures.extend(self.runtime.join_services());

        let report = ExecutionReport {
            aborted: self.runtime.is_aborted(),
            logged_exceptions: self.runtime.exceptions().logged(),
            stage_states: self
                .runtime
                .stage_handles()
                .iter()
                .map(|h| (h.name().to_string(), h.state()))
                .collect(),
        };
        tracing::info!(
            "Execution finished{}",
            if report.aborted { " (aborted)" } else { "" }
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(PipelineError::ExecutionFailed(failures))
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("started", &self.plan.is_none())
            .field("stats", &self.stats)
            .finish()
    }
}
