use super::compiled_plan::{CompiledPlan, PlanStats};
use super::configuration::{Configuration, Connection};
use super::error::{PipelineError, ValidationIssue, ValidationReport};
use super::executor::ThreadDomain;
use super::id::PortId;
use super::pipe::{synched_pipe, Pipe, UnsynchedPipe};
use super::runtime::RuntimeHandle;
use super::stage::StageSlot;
use super::state::{Interrupt, StageState};
use crate::config::ExecutionConfig;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Validates a configuration and turns it into a runnable plan
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Validate `config` and instantiate its pipes and thread domains.
    ///
    /// Validation reports every problem at once:
    /// 1. Type compliance of each connection.
    /// 2. Thread assignment: every active stage colours the passive stages it
    ///    reaches; a passive stage reached by two colours crosses threads.
    ///
    /// Passive stages no active stage reaches are only a warning.
    pub fn compile(config: Configuration) -> Result<CompiledPlan, PipelineError> {
        let start_time = std::time::Instant::now();
        let Configuration {
            stages,
            connections,
            instances,
            services,
            execution,
            listener,
            ..
        } = config;

        let mut report = ValidationReport::new();
        Self::check_types(&stages, &connections, &mut report)?;

        let fwd_adj = Self::build_adjacency(stages.len(), &connections);
        let owners = Self::color_threads(&stages, &fwd_adj);
        Self::check_thread_assignment(&stages, &owners, &mut report);

        if report.has_errors() {
            return Err(PipelineError::InvalidConfiguration(report));
        }
        let warnings: Vec<ValidationIssue> = report.warnings().cloned().collect();
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let listener = listener.unwrap_or_else(|| execution.exception_policy.listener());
        let runtime = RuntimeHandle::new(
            execution.clone(),
            listener,
            stages.len() as u32,
            instances,
        );

        let mut stages = stages;
        let (pipes, synched_pipes) = Self::instantiate_pipes(&mut stages, &connections, &execution)?;
        Self::warn_unconnected(&stages);

        let handles: Vec<_> = stages.iter().map(|slot| slot.handle().clone()).collect();
        for handle in &handles {
            handle.change_state(StageState::Validated)?;
            runtime.register_stage(handle.clone());
        }

        let colors: Vec<Option<usize>> = owners
            .iter()
            .map(|o| if o.len() == 1 { o.first().copied() } else { None })
            .collect();
        let interrupts: HashMap<usize, Interrupt> = stages
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.core.is_active())
            .map(|(idx, _)| (idx, Interrupt::new()))
            .collect();

        let active_stages = interrupts.len();
        let unreachable_stages = colors.iter().filter(|c| c.is_none()).count();
        let mut domains: HashMap<usize, ThreadDomain> = HashMap::new();
        for (idx, slot) in stages.into_iter().enumerate() {
            let Some(color) = colors[idx] else {
                continue;
            };
            if let Some(interrupt) = interrupts.get(&color) {
                slot.handle().assign_interrupt(interrupt.clone());
            }
            domains
                .entry(color)
                .or_insert_with(|| ThreadDomain::new(runtime.clone()))
                .insert(slot);
        }
        let mut domains: Vec<_> = domains
            .into_iter()
            .map(|(color, domain)| (handles[color].id(), domain))
            .collect();
        domains.sort_by_key(|(root, _)| *root);

        let stats = PlanStats {
            total_stages: handles.len(),
            active_stages,
            passive_stages: handles.len() - active_stages,
            unreachable_stages,
            connections: connections.len(),
            synched_pipes,
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };
        tracing::debug!("Compiled plan: {:?}", stats);

        Ok(CompiledPlan {
            runtime,
            domains,
            pipes,
            handles,
            services,
            warnings,
            stats,
        })
    }

    /// Record every connection whose target port does not accept the source's type
    fn check_types(
        stages: &[StageSlot],
        connections: &[Connection],
        report: &mut ValidationReport,
    ) -> Result<(), PipelineError> {
        for connection in connections {
            let source = stages
                .get(connection.source.stage().index())
                .ok_or(PipelineError::UnknownPort(connection.source))?
                .core
                .port(connection.source)?;
            let target = stages
                .get(connection.target.stage().index())
                .ok_or(PipelineError::UnknownPort(connection.target))?
                .core
                .port(connection.target)?;
            if !target.descriptor.ty.accepts(&source.descriptor.ty) {
                report.push(ValidationIssue::InvalidPortConnection {
                    source: connection.source,
                    target: connection.target,
                    source_type: source.descriptor.ty.name(),
                    target_type: target.descriptor.ty.name(),
                });
            }
        }
        Ok(())
    }

    /// Build forward adjacency lists
    fn build_adjacency(n: usize, connections: &[Connection]) -> Vec<Vec<usize>> {
        let mut fwd_adj = vec![Vec::new(); n];
        for connection in connections {
            fwd_adj[connection.source.stage().index()].push(connection.target.stage().index());
        }
        fwd_adj
    }

    /// For every stage, the active stages whose thread would execute it.
    ///
    /// An active stage is its own single owner. Colouring stops at active
    /// stages since those run on a thread of their own.
    fn color_threads(stages: &[StageSlot], fwd_adj: &[Vec<usize>]) -> Vec<BTreeSet<usize>> {
        let n = stages.len();
        let mut owners = vec![BTreeSet::new(); n];

        for (root, slot) in stages.iter().enumerate() {
            if !slot.core.is_active() {
                continue;
            }
            owners[root].insert(root);

            let mut visited = vec![false; n];
            visited[root] = true;
            let mut queue = VecDeque::from([root]);
            while let Some(current) = queue.pop_front() {
                for &next in &fwd_adj[current] {
                    if visited[next] || stages[next].core.is_active() {
                        continue;
                    }
                    visited[next] = true;
                    owners[next].insert(root);
                    queue.push_back(next);
                }
            }
        }
        owners
    }

    fn check_thread_assignment(
        stages: &[StageSlot],
        owners: &[BTreeSet<usize>],
        report: &mut ValidationReport,
    ) {
        for (idx, stage_owners) in owners.iter().enumerate() {
            match stage_owners.len() {
                0 => report.push(ValidationIssue::UnreachableStage {
                    stage: stages[idx].name().to_string(),
                }),
                1 => {}
                _ => report.push(ValidationIssue::CrossingThreads {
                    stage: stages[idx].name().to_string(),
                    owners: stage_owners
                        .iter()
                        .map(|&owner| stages[owner].name().to_string())
                        .collect(),
                }),
            }
        }
    }

    /// A pipe into an active stage crosses threads; every other pipe stays
    /// within one thread.
    fn instantiate_pipes(
        stages: &mut [StageSlot],
        connections: &[Connection],
        execution: &ExecutionConfig,
    ) -> Result<(HashMap<PortId, Arc<dyn Pipe>>, usize), PipelineError> {
        let mut pipes: HashMap<PortId, Arc<dyn Pipe>> = HashMap::new();
        let mut synched = 0;

        for connection in connections {
            let target_slot = &stages[connection.target.stage().index()];
            let target_stage = target_slot.handle().clone();
            let pipe: Arc<dyn Pipe> = if target_slot.core.is_active() {
                synched += 1;
                synched_pipe(
                    execution,
                    connection.source,
                    connection.target,
                    target_stage,
                    connection.capacity,
                )
            } else {
                Arc::new(UnsynchedPipe::new(
                    connection.source,
                    connection.target,
                    target_stage,
                ))
            };
            tracing::debug!(
                "{:?} -> {:?}: {:?} pipe, capacity {}",
                connection.source,
                connection.target,
                pipe.kind(),
                pipe.capacity()
            );

            stages[connection.source.stage().index()]
                .core
                .attach_pipe(connection.source, pipe.clone())?;
            stages[connection.target.stage().index()]
                .core
                .attach_pipe(connection.target, pipe.clone())?;
            pipes.insert(connection.target, pipe);
        }
        Ok((pipes, synched))
    }

    fn warn_unconnected(stages: &[StageSlot]) {
        for slot in stages {
            let ports = slot
                .core
                .input_descriptors()
                .chain(slot.core.output_descriptors());
            for descriptor in ports {
                let connected = slot
                    .core
                    .port(descriptor.id)
                    .map(|p| p.is_connected())
                    .unwrap_or(false);
                if !connected {
                    tracing::warn!("{}: port {} is not connected", slot.name(), descriptor);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::StageContext;
    use crate::pipeline::pipe::PipeKind;
    use crate::pipeline::port::{InputPort, OutputPort};
    use crate::pipeline::stage::Stage;

    struct Inert;

    impl Stage for Inert {
        fn execute(&mut self, _ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn producer(config: &mut Configuration) -> OutputPort<u32> {
        let mut b = config.stage();
        let out = b.output_port::<u32>();
        b.build(Inert);
        out
    }

    fn passive<T: 'static>(config: &mut Configuration) -> (InputPort<T>, OutputPort<T>) {
        let mut b = config.stage();
        let input = b.input_port::<T>();
        let output = b.output_port::<T>();
        b.build(Inert);
        (input, output)
    }

    #[test]
    fn test_linear_pipeline_uses_one_thread() {
        let mut config = Configuration::new();
        let out = producer(&mut config);
        let (a_in, a_out) = passive::<u32>(&mut config);
        let (b_in, _) = passive::<u32>(&mut config);
        config.connect_ports(out, a_in).unwrap();
        config.connect_ports(a_out, b_in).unwrap();

        let plan = PipelineCompiler::compile(config).unwrap();
        assert_eq!(plan.thread_count(), 1);
        assert_eq!(plan.stats.active_stages, 1);
        assert_eq!(plan.stats.synched_pipes, 0);
        assert_eq!(plan.pipes[&a_in.id()].kind(), PipeKind::Unsynched);
        assert!(plan
            .stage_handles()
            .iter()
            .all(|h| h.state() == StageState::Validated));
    }

    #[test]
    fn test_active_target_gets_synched_pipe() {
        let mut config = Configuration::new();
        let out = producer(&mut config);
        let mut b = config.stage();
        let input = b.input_port::<u32>();
        b.active().build(Inert);
        config.connect_ports_with_capacity(out, input, 7).unwrap();

        let plan = PipelineCompiler::compile(config).unwrap();
        assert_eq!(plan.thread_count(), 2);
        let pipe = &plan.pipes[&input.id()];
        assert_eq!(pipe.kind(), PipeKind::BoundedSpsc);
        assert_eq!(pipe.capacity(), 7);
    }

    #[test]
    fn test_crossing_threads_rejected() {
        let mut config = Configuration::new();
        let first = producer(&mut config);
        let second = producer(&mut config);
        let mut b = config.stage();
        let in0 = b.input_port::<u32>();
        let in1 = b.input_port::<u32>();
        b.build(Inert);
        config.connect_ports(first, in0).unwrap();
        config.connect_ports(second, in1).unwrap();

        match PipelineCompiler::compile(config) {
            Err(PipelineError::InvalidConfiguration(report)) => {
                assert_eq!(report.errors().count(), 1);
                assert!(matches!(
                    &report.issues()[0],
                    ValidationIssue::CrossingThreads { owners, .. } if owners.len() == 2
                ));
            }
            other => panic!("expected crossing threads, got {other:?}"),
        }
    }

    #[test]
    fn test_every_type_mismatch_is_reported() {
        let mut config = Configuration::new();
        let out0 = producer(&mut config);
        let out1 = producer(&mut config);
        let (in0, _) = passive::<String>(&mut config);
        let mut b = config.stage();
        let in1 = b.input_port::<i64>();
        b.active().build(Inert);
        config.connect_ports(out0, in0).unwrap();
        config.connect_ports(out1, in1).unwrap();

        let Err(PipelineError::InvalidConfiguration(report)) = PipelineCompiler::compile(config)
        else {
            panic!("expected an invalid configuration");
        };
        let mismatches = report
            .errors()
            .filter(|i| matches!(i, ValidationIssue::InvalidPortConnection { .. }))
            .count();
        assert_eq!(mismatches, 2);
    }

    #[test]
    fn test_unreachable_passive_stage_is_a_warning() {
        let mut config = Configuration::new();
        producer(&mut config);
        passive::<u32>(&mut config);

        let plan = PipelineCompiler::compile(config).unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert_eq!(plan.stats.unreachable_stages, 1);
        assert_eq!(plan.thread_count(), 1);
    }
}
