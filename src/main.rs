//! stagepipe demo: runs a producer through an adaptive task farm.
//!
//! Usage: `stagepipe [config.toml]`. Without a path the default settings are
//! used.

use stagepipe::{
    error::ResultExt,
    pipeline::{Configuration, Execution},
    stages::{Collector, ObjectProducer, Transformer},
    EngineConfig, TaskFarm,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEMO_ELEMENTS: u64 = 20_000;

/// Deliberately slow per-element work so that the farm has a reason to grow.
fn checksum(seed: u64) -> u64 {
    (0..2_000u64).fold(seed, |acc, i| acc.rotate_left(5) ^ i.wrapping_mul(0x9E37_79B9))
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting stagepipe demo");

    let mut pipeline = Configuration::with_execution_config(config.execution.clone());

    let mut producer = pipeline.stage();
    let numbers = producer.output_port::<u64>();
    producer.build(ObjectProducer::new(numbers, 0..DEMO_ELEMENTS));

    let farm = TaskFarm::<u64, u64, _>::new(Transformer::worker(checksum), config.task_farm.clone())
        .build(&mut pipeline)?;

    let mut sink = pipeline.stage();
    let results = sink.input_port::<u64>();
    let collector = Collector::new(results);
    let collected = collector.collected();
    sink.build(collector);

    pipeline
        .connect_ports(numbers, farm.input)
        .context("Failed to connect producer")?;
    pipeline
        .connect_ports(farm.output, results)
        .context("Failed to connect collector")?;

    let report = Execution::new(pipeline)?.execute_blocking()?;

    tracing::info!(
        "Processed {} of {} elements with at most {} workers",
        collected.len(),
        DEMO_ELEMENTS,
        farm.monitor.max_number_of_stages()
    );
    for exception in &report.logged_exceptions {
        tracing::warn!("{}: {}", exception.stage, exception.message);
    }
    if farm.monitor.is_enabled() {
        println!("{}", farm.monitor.to_json()?);
    }

    tracing::info!("Shutting down...");
    Ok(())
}
