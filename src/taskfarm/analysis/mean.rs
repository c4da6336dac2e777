use super::{clamp_prediction, ThroughputAlgorithm};
use crate::taskfarm::history::ThroughputHistory;

/// Expects the average throughput of the previous measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAlgorithm;

impl ThroughputAlgorithm for MeanAlgorithm {
    fn name(&self) -> &'static str {
        "MeanAlgorithm"
    }

    fn expected_throughput(&self, history: &ThroughputHistory, window: usize) -> f64 {
        let values: Vec<f64> = (1..=window)
            .filter_map(|i| history.entry(i))
            .map(|entry| entry.throughput)
            .collect();
        if values.is_empty() {
            return 0.0;
        }
        clamp_prediction(values.iter().sum::<f64>() / values.len() as f64)
    }
}
