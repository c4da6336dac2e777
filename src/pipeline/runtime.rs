//! Shared state of one running execution.
//!
//! The [`RuntimeHandle`] is cloned into every stage thread and runtime
//! service. It owns the join handles of all threads, so stages created after
//! the execution started (task-farm workers) are awaited like the initial ones.

use crate::config::ExecutionConfig;
use crate::pipeline::configuration::InstanceCounter;
use crate::pipeline::error::PipelineError;
use crate::pipeline::exception::{ExceptionListener, ExceptionReporter};
use crate::pipeline::executor::ThreadDomain;
use crate::pipeline::id::{PortId, StageId};
use crate::pipeline::pipe::Pipe;
use crate::pipeline::stage::{simple_type_name, Stage, StageDeclaration, StageSlot};
use crate::pipeline::state::{Interrupt, StageHandle, StageState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// A background activity started alongside the stage threads.
pub trait RuntimeService: Send {
    fn name(&self) -> &str;

    /// Called once before any stage thread runs.
    fn start(self: Box<Self>, ctx: &ServiceContext) -> Result<(), PipelineError>;
}

/// What a service can see of the execution it belongs to.
pub struct ServiceContext {
    runtime: RuntimeHandle,
    pipes: HashMap<PortId, Arc<dyn Pipe>>,
    stages: HashMap<StageId, StageHandle>,
}

impl ServiceContext {
    pub(crate) fn new(
        runtime: RuntimeHandle,
        pipes: HashMap<PortId, Arc<dyn Pipe>>,
        stages: HashMap<StageId, StageHandle>,
    ) -> Self {
        Self {
            runtime,
            pipes,
            stages,
        }
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// The pipe attached to input port `target`.
    pub fn pipe_into(&self, target: PortId) -> Option<Arc<dyn Pipe>> {
        self.pipes.get(&target).cloned()
    }

    pub fn stage(&self, id: StageId) -> Option<StageHandle> {
        self.stages.get(&id).cloned()
    }
}

struct StageThread {
    stage: String,
    handle: JoinHandle<Result<(), PipelineError>>,
}

struct ServiceThread {
    name: String,
    handle: JoinHandle<()>,
}

struct RuntimeInner {
    config: ExecutionConfig,
    exceptions: ExceptionReporter,
    stages: Mutex<Vec<StageHandle>>,
    threads: Mutex<Vec<StageThread>>,
    services: Mutex<Vec<ServiceThread>>,
    next_stage_id: AtomicU32,
    instances: Mutex<InstanceCounter>,
    aborted: AtomicBool,
    shutdown: AtomicBool,
}

#[derive(Clone)]
pub struct RuntimeHandle(Arc<RuntimeInner>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl RuntimeHandle {
    pub(crate) fn new(
        config: ExecutionConfig,
        listener: Arc<dyn ExceptionListener>,
        next_stage_id: u32,
        instances: InstanceCounter,
    ) -> Self {
        let exceptions =
            ExceptionReporter::new(listener, config.log_exceptions, config.exception_log_capacity);
        Self(Arc::new(RuntimeInner {
            config,
            exceptions,
            stages: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            next_stage_id: AtomicU32::new(next_stage_id),
            instances: Mutex::new(instances),
            aborted: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: ExecutionConfig) -> Self {
        let listener = config.exception_policy.listener();
        Self::new(config, listener, 0, InstanceCounter::default())
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.0.config
    }

    pub fn exceptions(&self) -> &ExceptionReporter {
        &self.0.exceptions
    }

    /// Starts declaring a stage that will be created while the execution runs.
    pub fn declare_stage(&self) -> StageDeclaration {
        let id = self.0.next_stage_id.fetch_add(1, Ordering::Relaxed);
        StageDeclaration::new(StageId(id))
    }

    /// Turns a runtime declaration into a stage slot named after `S`.
    pub fn create_stage<S: Stage>(&self, declaration: StageDeclaration, stage: S) -> StageSlot {
        let name = lock(&self.0.instances).next_name(simple_type_name::<S>());
        declaration.finish(name, stage)
    }

    pub(crate) fn register_stage(&self, handle: StageHandle) {
        lock(&self.0.stages).push(handle);
    }

    pub fn stage_handles(&self) -> Vec<StageHandle> {
        lock(&self.0.stages).clone()
    }

    /// Starts a thread for a stage created after the execution began.
    pub fn start_stage(&self, slot: StageSlot) -> Result<StageHandle, PipelineError> {
        let handle = slot.handle().clone();
        handle.assign_interrupt(Interrupt::new());
        if handle.state() < StageState::Validated {
            handle.change_state(StageState::Validated)?;
        }
        self.register_stage(handle.clone());
        if self.is_aborted() {
            handle.abort();
        }

        let root = slot.id();
        let mut domain = ThreadDomain::new(self.clone());
        domain.insert(slot);
        self.spawn_domain(domain, root, handle.name().to_string())?;
        tracing::info!("Started stage {} at runtime", handle.name());
        Ok(handle)
    }

    pub(crate) fn spawn_domain(
        &self,
        domain: ThreadDomain,
        root: StageId,
        stage: String,
    ) -> Result<(), PipelineError> {
        let runtime = self.clone();
        let thread_stage = stage.clone();
        let handle = std::thread::Builder::new()
            .name(stage.clone())
            .spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    domain.run(root)
                }));
                match outcome {
                    Ok(result) => result,
                    Err(payload) => {
                        runtime.on_terminate();
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        tracing::error!("Thread of {} panicked: {}", thread_stage, message);
                        Err(PipelineError::ThreadPanicked {
                            stage: thread_stage,
                            message,
                        })
                    }
                }
            })
            .map_err(|e| PipelineError::ExecutionFailed(vec![format!("spawn {stage}: {e}")]))?;
        lock(&self.0.threads).push(StageThread { stage, handle });
        Ok(())
    }

    /// Runs `body` on a named background thread joined after all stage threads.
    pub fn spawn_service<F>(&self, name: &str, body: F) -> Result<(), PipelineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| PipelineError::Service {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        lock(&self.0.services).push(ServiceThread {
            name: name.to_string(),
            handle,
        });
        Ok(())
    }

    /// Aborts every stage of the execution.
    pub fn on_terminate(&self) {
        if !self.0.aborted.swap(true, Ordering::AcqRel) {
            tracing::info!("Aborting execution");
        }
        for stage in lock(&self.0.stages).iter() {
            stage.abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        self.0.shutdown.store(true, Ordering::Release);
    }

    /// Joins stage threads until none are left, including ones started meanwhile.
    pub(crate) fn join_stages(&self) -> Vec<String> {
        let mut failures = Vec::new();
        loop {
            let next = lock(&self.0.threads).pop();
            let Some(thread) = next else {
                break;
            };
            match thread.handle.join() {
                Ok(Ok(())) | Ok(Err(PipelineError::Terminate)) => {}
                Ok(Err(err)) => failures.push(err.to_string()),
                Err(_) => failures.push(format!("thread of {} panicked", thread.stage)),
            }
        }
        failures
    }

    pub(crate) fn join_services(&self) -> Vec<String> {
        let services: Vec<ServiceThread> = lock(&self.0.services).drain(..).collect();
        services
            .into_iter()
            .filter_map(|service| {
                service
                    .handle
                    .join()
                    .err()
                    .map(|_| format!("service {} panicked", service.name))
            })
            .collect()
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("stages", &lock(&self.0.stages).len())
            .field("aborted", &self.is_aborted())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::StageContext;

    struct Idle;

    impl Stage for Idle {
        fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
            ctx.work_completed()?;
            Ok(())
        }
    }

    #[test]
    fn test_runtime_stage_names_continue_counter() {
        let mut instances = InstanceCounter::default();
        assert_eq!(instances.next_name("Idle"), "Idle-0");
        let runtime = RuntimeHandle::new(
            ExecutionConfig::default(),
            crate::pipeline::exception::ExceptionPolicy::Terminate.listener(),
            5,
            instances,
        );
        let decl = runtime.declare_stage();
        assert_eq!(decl.id(), StageId(5));
        let slot = runtime.create_stage(decl, Idle);
        assert_eq!(slot.name(), "Idle-1");
    }

    #[test]
    fn test_started_stage_is_joined() {
        let runtime = RuntimeHandle::for_tests(ExecutionConfig::default());
        let slot = runtime.create_stage(runtime.declare_stage(), Idle);
        let handle = runtime.start_stage(slot).unwrap();
        assert!(runtime.join_stages().is_empty());
        assert_eq!(handle.state(), StageState::Terminated);
    }

    #[test]
    fn test_on_terminate_aborts_registered_stages() {
        let runtime = RuntimeHandle::for_tests(ExecutionConfig::default());
        let slot = runtime.create_stage(runtime.declare_stage(), Idle);
        let handle = slot.handle().clone();
        handle.assign_interrupt(Interrupt::new());
        runtime.register_stage(handle.clone());
        runtime.on_terminate();
        assert!(handle.is_aborted());
        assert!(runtime.is_aborted());
    }
}
