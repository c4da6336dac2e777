//! Merging several producers into one stream

mod common;

use common::builders::{collector, producer};
use serial_test::serial;
use stagepipe::pipeline::{Configuration, Execution, StageState};
use stagepipe::stages::Merger;

#[test]
#[serial]
fn test_merge_of_producers_is_exact_union() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 500;

    let mut config = Configuration::new();
    let outputs: Vec<_> = (0..PRODUCERS)
        .map(|p| producer(&mut config, (0..PER_PRODUCER).map(|i| p * PER_PRODUCER + i).collect()))
        .collect();

    let mut merger = config.stage().active();
    let inputs: Vec<_> = (0..PRODUCERS).map(|_| merger.input_port::<u32>()).collect();
    let merged = merger.output_port::<u32>();
    merger.build(Merger::new(merged));

    let (sink, collected) = collector::<u32>(&mut config);
    for (output, input) in outputs.into_iter().zip(inputs) {
        config.connect_ports(output, input).unwrap();
    }
    config.connect_ports(merged, sink).unwrap();

    let report = Execution::new(config).unwrap().execute_blocking().unwrap();

    let mut values = collected.take();
    values.sort_unstable();
    assert_eq!(values, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    assert_eq!(report.state_of("Merger-0"), Some(StageState::Terminated));
}

#[test]
#[serial]
fn test_merge_keeps_order_per_producer() {
    let mut config = Configuration::new();
    let low = producer(&mut config, (0..200u32).collect());
    let high = producer(&mut config, (1_000..1_200u32).collect());

    let mut merger = config.stage().active();
    let first = merger.input_port::<u32>();
    let second = merger.input_port::<u32>();
    let merged = merger.output_port::<u32>();
    merger.build(Merger::new(merged));

    let (sink, collected) = collector::<u32>(&mut config);
    config.connect_ports(low, first).unwrap();
    config.connect_ports(high, second).unwrap();
    config.connect_ports(merged, sink).unwrap();

    Execution::new(config).unwrap().execute_blocking().unwrap();

    let values = collected.take();
    let lows: Vec<_> = values.iter().copied().filter(|v| *v < 1_000).collect();
    let highs: Vec<_> = values.iter().copied().filter(|v| *v >= 1_000).collect();
    assert_eq!(lows, (0..200u32).collect::<Vec<_>>());
    assert_eq!(highs, (1_000..1_200u32).collect::<Vec<_>>());
}
