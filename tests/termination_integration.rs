//! Termination cascade through linear pipelines

mod common;

use common::builders::{collector, producer};
use common::stages::{CountingRelay, SkipsBaseHook};
use serial_test::serial;
use stagepipe::pipeline::{Configuration, Execution, PipelineError, StageState};

#[test]
#[serial]
fn test_linear_pipeline_terminates_in_order() {
    let mut config = Configuration::new();
    let numbers = producer(&mut config, (0..1_000u32).collect());

    let mut relay = config.stage().active();
    let relay_in = relay.input_port::<u32>();
    let relay_out = relay.output_port::<u32>();
    let stage = CountingRelay::new(relay_in, relay_out);
    let hooks = stage.hooks();
    relay.build(stage);

    let (sink, collected) = collector::<u32>(&mut config);
    config.connect_ports(numbers, relay_in).unwrap();
    config.connect_ports(relay_out, sink).unwrap();

    let report = Execution::new(config).unwrap().execute_blocking().unwrap();

    assert!(!report.aborted);
    assert_eq!(collected.to_vec(), (0..1_000u32).collect::<Vec<_>>());
    assert_eq!(hooks.starting(), 1);
    assert_eq!(hooks.terminating(), 1);
    for (stage, state) in &report.stage_states {
        assert_eq!(*state, StageState::Terminated, "{stage} did not terminate");
    }
}

#[test]
#[serial]
fn test_passive_chain_runs_on_producer_thread() {
    let mut config = Configuration::new();
    let numbers = producer(&mut config, vec!["a".to_string(), "b".to_string()]);

    let mut relay = config.stage();
    let relay_in = relay.input_port::<String>();
    let relay_out = relay.output_port::<String>();
    let stage = CountingRelay::new(relay_in, relay_out);
    let hooks = stage.hooks();
    relay.build(stage);

    let (sink, collected) = collector::<String>(&mut config);
    config.connect_ports(numbers, relay_in).unwrap();
    config.connect_ports(relay_out, sink).unwrap();

    let execution = Execution::new(config).unwrap();
    assert_eq!(execution.stats().active_stages, 1);
    assert_eq!(execution.stats().passive_stages, 2);
    execution.execute_blocking().unwrap();

    assert_eq!(collected.to_vec(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(hooks.terminating(), 1);
}

#[test]
#[serial]
fn test_empty_producer_still_terminates_consumers() {
    let mut config = Configuration::new();
    let numbers = producer::<u64>(&mut config, Vec::new());
    let (sink, collected) = collector::<u64>(&mut config);
    config.connect_ports(numbers, sink).unwrap();

    let report = Execution::new(config).unwrap().execute_blocking().unwrap();

    assert!(collected.is_empty());
    assert_eq!(report.state_of("Collector-0"), Some(StageState::Terminated));
}

#[test]
#[serial]
fn test_terminating_hook_without_base_call_fails_execution() {
    let mut config = Configuration::new();
    let numbers = producer(&mut config, (0..10u32).collect());
    let mut sink = config.stage().active();
    let input = sink.input_port::<u32>();
    sink.build(SkipsBaseHook { input });
    config.connect_ports(numbers, input).unwrap();

    let result = Execution::new(config).unwrap().execute_blocking();

    match result {
        Err(PipelineError::ExecutionFailed(failures)) => {
            assert!(
                failures.iter().any(|f| f.contains(
                    "Stage SkipsBaseHook-0: overridden on_terminating did not call the base hook"
                )),
                "{failures:?}"
            );
        }
        other => panic!("expected a failed execution, got {other:?}"),
    }
}
