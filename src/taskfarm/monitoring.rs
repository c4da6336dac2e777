//! Monitoring of task farm pipes and worker counts.
//!
//! Enabled by `monitoring_enabled`. Measurements are appended after every
//! adaptation iteration and can be exported as JSON once the execution
//! finished. Throughput values are the ones recorded by the adaptation
//! thread for the same iteration, since reading a pipe's throughput resets it.

use crate::pipeline::pipe::MonitorablePipe;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// One worker input pipe as seen by a single measurement.
pub struct PipeSample<'a> {
    /// Stable id of the pipe across measurements
    pub id: usize,
    pub pipe: &'a dyn MonitorablePipe,
    pub push_throughput: u64,
    pub pull_throughput: u64,
}

/// Parameters recorded per measurement for one pipe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipeMonitoringData {
    pub num_pushes: u64,
    pub num_pulls: u64,
    pub size: usize,
    pub capacity: usize,
    /// Elements added since the previous measurement
    pub push_throughput: u64,
    /// Elements removed since the previous measurement
    pub pull_throughput: u64,
    pub num_waits: u64,
    pub pipe_id: usize,
}

/// All pipes measured at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipeMeasurement {
    /// Milliseconds since the first measurement
    pub time_ms: u64,
    pub pipes: Vec<PipeMonitoringData>,
}

/// Parameters recorded per measurement for the whole farm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFarmMonitoringData {
    pub time_ms: u64,
    pub stages: usize,
    pub mean_pull_throughput: f64,
    pub mean_push_throughput: f64,
    pub sum_of_pull_throughput: f64,
    pub sum_of_push_throughput: f64,
    pub throughput_boundary: f64,
}

fn elapsed_ms(start: &mut Option<Instant>) -> u64 {
    start.get_or_insert_with(Instant::now).elapsed().as_millis() as u64
}

#[derive(Debug, Default)]
pub struct PipeMonitoringService {
    start: Option<Instant>,
    measurements: Vec<PipeMeasurement>,
}

impl PipeMonitoringService {
    pub fn do_measurement(&mut self, samples: &[PipeSample<'_>]) {
        let time_ms = elapsed_ms(&mut self.start);
        let pipes = samples
            .iter()
            .map(|sample| PipeMonitoringData {
                num_pushes: sample.pipe.num_pushes_since_start(),
                num_pulls: sample.pipe.num_pulls_since_start(),
                size: sample.pipe.size(),
                capacity: sample.pipe.capacity(),
                push_throughput: sample.push_throughput,
                pull_throughput: sample.pull_throughput,
                num_waits: sample.pipe.num_waits(),
                pipe_id: sample.id,
            })
            .collect();
        self.measurements.push(PipeMeasurement { time_ms, pipes });
    }

    pub fn measurements(&self) -> &[PipeMeasurement] {
        &self.measurements
    }
}

#[derive(Debug)]
pub struct TaskFarmMonitoringService {
    start: Option<Instant>,
    boundary: f64,
    data: Vec<TaskFarmMonitoringData>,
    max_number_of_stages: usize,
}

impl TaskFarmMonitoringService {
    pub fn new(boundary: f64) -> Self {
        Self {
            start: None,
            boundary,
            data: Vec::new(),
            max_number_of_stages: 0,
        }
    }

    pub fn do_measurement(&mut self, samples: &[PipeSample<'_>]) {
        let time_ms = elapsed_ms(&mut self.start);
        let stages = samples.len();
        let sum_pull: f64 = samples.iter().map(|s| s.pull_throughput as f64).sum();
        let sum_push: f64 = samples.iter().map(|s| s.push_throughput as f64).sum();
        let mean = |sum: f64| if stages > 0 { sum / stages as f64 } else { sum };

        self.data.push(TaskFarmMonitoringData {
            time_ms,
            stages,
            mean_pull_throughput: mean(sum_pull),
            mean_push_throughput: mean(sum_push),
            sum_of_pull_throughput: sum_pull,
            sum_of_push_throughput: sum_push,
            throughput_boundary: self.boundary,
        });
        self.max_number_of_stages = self.max_number_of_stages.max(stages);
    }

    pub fn data(&self) -> &[TaskFarmMonitoringData] {
        &self.data
    }

    pub fn max_number_of_stages(&self) -> usize {
        self.max_number_of_stages
    }
}

/// Everything recorded for one farm, in export form
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringExport {
    pub pipes: Vec<PipeMeasurement>,
    pub task_farm: Vec<TaskFarmMonitoringData>,
    pub max_number_of_stages: usize,
}

#[derive(Debug)]
struct MonitorState {
    pipes: PipeMonitoringService,
    task_farm: TaskFarmMonitoringService,
}

/// Shared view of a farm's monitoring data.
///
/// The adaptation thread writes into it; any other thread may read it.
#[derive(Debug, Clone)]
pub struct TaskFarmMonitor {
    enabled: bool,
    state: Arc<Mutex<MonitorState>>,
}

impl TaskFarmMonitor {
    pub fn new(enabled: bool, boundary: f64) -> Self {
        Self {
            enabled,
            state: Arc::new(Mutex::new(MonitorState {
                pipes: PipeMonitoringService::default(),
                task_farm: TaskFarmMonitoringService::new(boundary),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records one measurement of the given worker input pipes.
    pub fn record(&self, samples: &[PipeSample<'_>]) {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        state.pipes.do_measurement(samples);
        state.task_farm.do_measurement(samples);
    }

    pub fn pipe_measurements(&self) -> Vec<PipeMeasurement> {
        self.lock().pipes.measurements().to_vec()
    }

    pub fn task_farm_measurements(&self) -> Vec<TaskFarmMonitoringData> {
        self.lock().task_farm.data().to_vec()
    }

    /// Largest number of workers seen by any measurement.
    pub fn max_number_of_stages(&self) -> usize {
        self.lock().task_farm.max_number_of_stages()
    }

    pub fn export(&self) -> MonitoringExport {
        let state = self.lock();
        MonitoringExport {
            pipes: state.pipes.measurements().to_vec(),
            task_farm: state.task_farm.data().to_vec(),
            max_number_of_stages: state.task_farm.max_number_of_stages(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.export())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::{PortDirection, PortId, StageId};
    use crate::pipeline::pipe::{BoundedPipe, Pipe, Token};
    use crate::pipeline::state::StageHandle;

    fn pipe() -> BoundedPipe {
        let target = StageHandle::new(StageId(1), "Worker-0".to_string(), 1, 1);
        BoundedPipe::new(
            PortId::new(StageId(0), PortDirection::Output, 0),
            PortId::new(StageId(1), PortDirection::Input, 0),
            target,
            8,
        )
    }

    #[test]
    fn test_disabled_monitor_records_nothing() {
        let monitor = TaskFarmMonitor::new(false, 0.2);
        let pipe = pipe();
        monitor.record(&[PipeSample {
            id: 0,
            pipe: &pipe,
            push_throughput: 1,
            pull_throughput: 1,
        }]);
        assert!(monitor.task_farm_measurements().is_empty());
    }

    #[test]
    fn test_farm_means_and_sums() {
        let monitor = TaskFarmMonitor::new(true, 0.2);
        let (a, b) = (pipe(), pipe());
        a.add(Token::element(1u32)).unwrap();
        monitor.record(&[
            PipeSample {
                id: 0,
                pipe: &a,
                push_throughput: 4,
                pull_throughput: 2,
            },
            PipeSample {
                id: 1,
                pipe: &b,
                push_throughput: 2,
                pull_throughput: 0,
            },
        ]);

        let farm = monitor.task_farm_measurements();
        assert_eq!(farm.len(), 1);
        assert_eq!(farm[0].stages, 2);
        assert_eq!(farm[0].sum_of_push_throughput, 6.0);
        assert_eq!(farm[0].mean_push_throughput, 3.0);
        assert_eq!(farm[0].mean_pull_throughput, 1.0);
        assert_eq!(monitor.max_number_of_stages(), 2);

        let pipes = monitor.pipe_measurements();
        assert_eq!(pipes[0].pipes[0].size, 1);
        assert_eq!(pipes[0].pipes[0].num_pushes, 1);
        assert_eq!(pipes[0].pipes[1].pipe_id, 1);
    }

    #[test]
    fn test_export_is_json() {
        let monitor = TaskFarmMonitor::new(true, 0.2);
        monitor.record(&[]);
        let json: serde_json::Value = serde_json::from_str(&monitor.to_json().unwrap()).unwrap();
        assert_eq!(json["max_number_of_stages"], 0);
        assert_eq!(json["task_farm"][0]["throughput_boundary"], 0.2);
    }
}
