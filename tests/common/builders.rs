//! Helpers declaring the usual edge stages of a test pipeline

use stagepipe::pipeline::{Configuration, InputPort, OutputPort};
use stagepipe::stages::{Collected, Collector, ObjectProducer};
use stagepipe::TaskFarmConfiguration;

/// Adds a producer emitting `items` and returns its output port.
pub fn producer<T: Send + 'static>(config: &mut Configuration, items: Vec<T>) -> OutputPort<T> {
    let mut builder = config.stage();
    let output = builder.output_port::<T>();
    builder.build(ObjectProducer::new(output, items));
    output
}

/// Adds a passive collector and returns its input port and the collected elements.
pub fn collector<T: Send + 'static>(config: &mut Configuration) -> (InputPort<T>, Collected<T>) {
    let mut builder = config.stage();
    let input = builder.input_port::<T>();
    let collector = Collector::new(input);
    let collected = collector.collected();
    builder.build(collector);
    (input, collected)
}

/// Task farm settings that adapt within a few milliseconds.
pub fn fast_farm_config() -> TaskFarmConfiguration {
    TaskFarmConfiguration {
        monitoring_enabled: true,
        adaptation_interval_ms: 2,
        analysis_window: 2,
        max_samples_until_remove: 2,
        max_number_of_cores: 3,
        pipe_capacity: 16,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_farm_config_is_valid() {
        assert!(fast_farm_config().validate().is_ok());
    }
}
