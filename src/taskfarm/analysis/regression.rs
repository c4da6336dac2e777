use super::{clamp_prediction, ThroughputAlgorithm};
use crate::taskfarm::history::ThroughputHistory;

/// Least-squares line through the previous measurements, evaluated at the
/// newest timestamp.
///
/// Unlike the mean and weighted algorithms this one uses the timestamps of
/// the measurements rather than their positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionAlgorithm;

/// Ordinary least squares over `(x, y)` pairs; NaN when the slope is undefined.
fn predict(points: &[(f64, f64)], x: f64) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return f64::NAN;
    }
    let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (px, py)| {
        let dx = px - x_mean;
        (sxx + dx * dx, sxy + dx * (py - y_mean))
    });
    if sxx.abs() < 10.0 * f64::MIN_POSITIVE {
        return f64::NAN;
    }
    let slope = sxy / sxx;
    y_mean + slope * (x - x_mean)
}

impl ThroughputAlgorithm for RegressionAlgorithm {
    fn name(&self) -> &'static str {
        "RegressionAlgorithm"
    }

    fn expected_throughput(&self, history: &ThroughputHistory, window: usize) -> f64 {
        let points: Vec<(f64, f64)> = (1..=window)
            .filter_map(|i| history.entry(i))
            .map(|entry| (entry.timestamp, entry.throughput))
            .collect();
        clamp_prediction(predict(&points, history.timestamp_of_entry(0)))
    }
}
