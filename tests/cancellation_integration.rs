//! Aborting a running execution

mod common;

use common::builders::collector;
use common::stages::SlowRelay;
use serial_test::serial;
use stagepipe::pipeline::{Configuration, Execution, StageState};
use stagepipe::stages::ObjectProducer;
use std::time::{Duration, Instant};

#[test]
#[serial]
fn test_abort_unblocks_producer_waiting_on_full_pipe() {
    let mut config = Configuration::new();

    let mut source = config.stage();
    let numbers = source.output_port::<u64>();
    source.build(ObjectProducer::new(numbers, 0u64..));

    let mut relay = config.stage().active();
    let input = relay.input_port::<u64>();
    let output = relay.output_port::<u64>();
    relay.build(SlowRelay {
        input,
        output,
        delay: Duration::from_millis(20),
    });

    let (sink, collected) = collector::<u64>(&mut config);
    config.connect_ports_with_capacity(numbers, input, 1).unwrap();
    config.connect_ports(output, sink).unwrap();

    let mut execution = Execution::new(config).unwrap();
    execution.execute_non_blocking().unwrap();
    std::thread::sleep(Duration::from_millis(60));

    let aborted_at = Instant::now();
    execution.abort_eventually();
    let report = execution.wait_for_termination().unwrap();

    assert!(aborted_at.elapsed() < Duration::from_secs(2));
    assert!(report.aborted);
    assert_eq!(report.stage_states.len(), 3);
    for (stage, state) in &report.stage_states {
        assert_eq!(*state, StageState::Terminated, "{stage} did not terminate");
    }
    // the relay forwarded a handful of elements in order before the abort
    let values = collected.to_vec();
    assert!(values.len() < 10, "{} elements forwarded", values.len());
    assert!(values.iter().copied().eq(0..values.len() as u64));
}
