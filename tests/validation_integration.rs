//! Configuration faults are reported before any thread runs

mod common;

use common::builders::{collector, producer};
use common::stages::CountingRelay;
use stagepipe::pipeline::{Configuration, Execution, PipelineError, ValidationIssue};
use stagepipe::stages::ObjectProducer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn test_crossing_threads_and_type_mismatch_reported_together() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut config = Configuration::new();

    let mut first = config.stage();
    let first_out = first.output_port::<u32>();
    let flag = ran.clone();
    first.build(ObjectProducer::new(
        first_out,
        (0..3u32).inspect(move |_| flag.store(true, Ordering::SeqCst)),
    ));
    let second_out = producer(&mut config, vec![7u32]);

    // passive stage fed by two producer threads
    let mut relay = config.stage();
    let left = relay.input_port::<u32>();
    let right = relay.input_port::<u32>();
    let relay_out = relay.output_port::<u32>();
    relay.build(CountingRelay::new(left, relay_out));

    let (sink, _collected) = collector::<String>(&mut config);
    config.connect_ports(first_out, left).unwrap();
    config.connect_ports(second_out, right).unwrap();
    config.connect_ports(relay_out, sink).unwrap();

    let report = match Execution::new(config) {
        Err(PipelineError::InvalidConfiguration(report)) => report,
        other => panic!("expected an invalid configuration, got {other:?}"),
    };

    assert_eq!(report.errors().count(), 2);
    assert!(report
        .errors()
        .any(|issue| matches!(issue, ValidationIssue::CrossingThreads { .. })));
    assert!(report
        .errors()
        .any(|issue| matches!(issue, ValidationIssue::InvalidPortConnection { .. })));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_port_cannot_be_connected_twice() {
    let mut config = Configuration::new();
    let numbers = producer(&mut config, vec![1u8]);
    let (first, _) = collector::<u8>(&mut config);
    let (second, _) = collector::<u8>(&mut config);

    config.connect_ports(numbers, first).unwrap();
    let err = config.connect_ports(numbers, second).unwrap_err();
    assert!(matches!(err, PipelineError::PortAlreadyConnected(_)));
}

#[test]
fn test_unreachable_stage_is_only_a_warning() {
    let mut config = Configuration::new();
    let numbers = producer(&mut config, vec![1u8]);
    let (sink, _) = collector::<u8>(&mut config);
    let (_orphan, _) = collector::<u8>(&mut config);
    config.connect_ports(numbers, sink).unwrap();

    let execution = Execution::new(config).unwrap();
    assert!(execution
        .warnings()
        .iter()
        .any(|issue| matches!(issue, ValidationIssue::UnreachableStage { .. })));
}
