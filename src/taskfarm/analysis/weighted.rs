use super::{clamp_prediction, ThroughputAlgorithm};
use crate::taskfarm::history::ThroughputHistory;
use serde::{Deserialize, Serialize};

/// How fast the weight of older measurements decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMethod {
    #[default]
    Exponential,
    Linear,
    Logarithmic,
}

impl WeightMethod {
    /// Weight of the measurement at `position`, where 1 is the oldest.
    fn weight(self, position: usize) -> f64 {
        let position = position as f64;
        match self {
            WeightMethod::Exponential => (position - 1.0).exp2(),
            WeightMethod::Linear => position,
            WeightMethod::Logarithmic => (position + 1.0).ln(),
        }
    }
}

/// Weighted mean of the previous measurements, recent ones weighing more.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedAlgorithm {
    method: WeightMethod,
}

impl WeightedAlgorithm {
    pub fn new(method: WeightMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> WeightMethod {
        self.method
    }
}

impl ThroughputAlgorithm for WeightedAlgorithm {
    fn name(&self) -> &'static str {
        "WeightedAlgorithm"
    }

    fn expected_throughput(&self, history: &ThroughputHistory, window: usize) -> f64 {
        let available = window.min(history.len().saturating_sub(1));
        let (weighted_sum, total_weight) = (1..=available).fold((0.0, 0.0), |(sum, total), i| {
            let weight = self.method.weight(available - i + 1);
            (sum + weight * history.throughput_of_entry(i), total + weight)
        });
        if total_weight > 0.0 {
            clamp_prediction(weighted_sum / total_weight)
        } else {
            0.0
        }
    }
}
