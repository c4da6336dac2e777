//! Throughput analysis.
//!
//! A [`ThroughputAlgorithm`] predicts the throughput the farm should have
//! reached at the newest measurement from the `window` measurements before
//! it. The throughput score is the relative deviation of the measured
//! throughput from that prediction: positive when the farm got faster than
//! expected.
//!
//! Algorithms are looked up by name in a static registry, so the name can
//! come from a configuration file.

mod mean;
mod regression;
mod weighted;

pub use mean::MeanAlgorithm;
pub use regression::RegressionAlgorithm;
pub use weighted::{WeightMethod, WeightedAlgorithm};

use crate::taskfarm::config::TaskFarmConfiguration;
use crate::taskfarm::error::TaskFarmError;
use crate::taskfarm::history::ThroughputHistory;

/// Score reported while the history holds too few measurements.
pub const INVALID_SCORE: f64 = -1.0;

/// Predicts the expected throughput of a farm.
#[cfg_attr(test, mockall::automock)]
pub trait ThroughputAlgorithm: Send {
    fn name(&self) -> &'static str;

    /// Expected throughput at the timestamp of entry 0, computed from entries `1..=window`.
    fn expected_throughput(&self, history: &ThroughputHistory, window: usize) -> f64;
}

type Constructor = fn(&TaskFarmConfiguration) -> Box<dyn ThroughputAlgorithm>;

fn regression(_config: &TaskFarmConfiguration) -> Box<dyn ThroughputAlgorithm> {
    Box::new(RegressionAlgorithm)
}

fn mean(_config: &TaskFarmConfiguration) -> Box<dyn ThroughputAlgorithm> {
    Box::new(MeanAlgorithm)
}

fn weighted(config: &TaskFarmConfiguration) -> Box<dyn ThroughputAlgorithm> {
    Box::new(WeightedAlgorithm::new(config.weighted_method))
}

static REGISTRY: &[(&str, Constructor)] = &[
    ("RegressionAlgorithm", regression),
    ("MeanAlgorithm", mean),
    ("WeightedAlgorithm", weighted),
];

pub fn registered_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.iter().any(|(registered, _)| *registered == name)
}

/// Instantiates the algorithm named in `config`.
pub fn create_algorithm(
    config: &TaskFarmConfiguration,
) -> Result<Box<dyn ThroughputAlgorithm>, TaskFarmError> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == config.throughput_algorithm)
        .map(|(_, constructor)| constructor(config))
        .ok_or_else(|| TaskFarmError::UnknownAlgorithm {
            name: config.throughput_algorithm.clone(),
            known: registered_names().join(", "),
        })
}

/// NaN, infinite and negative predictions count as no throughput.
pub(crate) fn clamp_prediction(prediction: f64) -> f64 {
    if prediction.is_finite() && prediction > 0.0 {
        prediction
    } else {
        0.0
    }
}

/// Scores the newest measurement of a history.
pub struct AnalysisService {
    algorithm: Box<dyn ThroughputAlgorithm>,
    window: usize,
    last_score: f64,
}

impl AnalysisService {
    pub fn new(algorithm: Box<dyn ThroughputAlgorithm>, window: usize) -> Self {
        Self {
            algorithm,
            window,
            last_score: INVALID_SCORE,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Computes and remembers the throughput score of `history`.
    pub fn analyze(&mut self, history: &ThroughputHistory) -> f64 {
        self.last_score = if history.len() <= self.window {
            INVALID_SCORE
        } else {
            let expected = clamp_prediction(self.algorithm.expected_throughput(history, self.window));
            let measured = history.throughput_of_entry(0);
            let score = if expected > 0.0 {
                (measured - expected) / expected
            } else {
                0.0
            };
            if score.is_finite() {
                score
            } else {
                0.0
            }
        };
        self.last_score
    }

    pub fn throughput_score(&self) -> f64 {
        self.last_score
    }
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("algorithm", &self.algorithm.name())
            .field("window", &self.window)
            .field("last_score", &self.last_score)
            .finish()
    }
}
