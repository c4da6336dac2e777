//! Decision logic of the adaptation thread.
//!
//! The command service runs in one of two modes:
//!
//! - **Adding**: after every added worker, wait up to
//!   `max_samples_until_remove` iterations for a score above the boundary.
//!   A good score adds another worker; running out of samples switches to
//!   removing and drops the newest worker again. Reaching
//!   `max_number_of_cores` also switches to removing.
//! - **Removing**: remove any worker (except the first) whose input queue is
//!   empty. A score above the boundary switches back to adding.

use crate::taskfarm::analysis::INVALID_SCORE;
use crate::taskfarm::config::TaskFarmConfiguration;
use serde::Serialize;

/// Countdown value before the first worker was added.
pub const INIT_SAMPLES_UNTIL_REMOVE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconfigurationMode {
    Adding,
    Removing,
}

/// Structural change requested for the farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigurationCommand {
    None,
    Add,
    /// Remove the worker at this index of the worker list.
    Remove(usize),
}

#[derive(Debug, Clone)]
pub struct ReconfigurationCommandService {
    mode: ReconfigurationMode,
    samples_until_remove: i64,
    max_samples_until_remove: i64,
    boundary: f64,
    max_workers: usize,
}

impl ReconfigurationCommandService {
    pub fn new(config: &TaskFarmConfiguration) -> Self {
        Self {
            mode: ReconfigurationMode::Adding,
            samples_until_remove: INIT_SAMPLES_UNTIL_REMOVE,
            max_samples_until_remove: i64::from(config.max_samples_until_remove),
            boundary: config.throughput_score_boundary,
            max_workers: config.max_number_of_cores,
        }
    }

    pub fn mode(&self) -> ReconfigurationMode {
        self.mode
    }

    pub fn samples_until_remove(&self) -> i64 {
        self.samples_until_remove
    }

    /// Decides on one command.
    ///
    /// `queue_sizes` holds the current input queue size of every worker,
    /// in worker order.
    pub fn decide(&mut self, score: f64, queue_sizes: &[usize]) -> ReconfigurationCommand {
        match self.mode {
            ReconfigurationMode::Adding => self.decide_adding(score, queue_sizes.len()),
            ReconfigurationMode::Removing => self.decide_removing(score, queue_sizes),
        }
    }

    fn decide_adding(&mut self, score: f64, workers: usize) -> ReconfigurationCommand {
        if workers >= self.max_workers {
            self.switch_to(ReconfigurationMode::Removing);
            return ReconfigurationCommand::None;
        }
        if score == INVALID_SCORE {
            return ReconfigurationCommand::None;
        }

        if self.samples_until_remove == INIT_SAMPLES_UNTIL_REMOVE {
            self.samples_until_remove = self.max_samples_until_remove;
            ReconfigurationCommand::Add
        } else if self.samples_until_remove > 0 {
            if score > self.boundary {
                self.samples_until_remove = self.max_samples_until_remove;
                ReconfigurationCommand::Add
            } else {
                self.samples_until_remove -= 1;
                ReconfigurationCommand::None
            }
        } else {
            self.switch_to(ReconfigurationMode::Removing);
            if workers > 1 {
                ReconfigurationCommand::Remove(workers - 1)
            } else {
                ReconfigurationCommand::None
            }
        }
    }

    fn decide_removing(&mut self, score: f64, queue_sizes: &[usize]) -> ReconfigurationCommand {
        // worker 0 is never removed
        let command = queue_sizes
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, size)| **size == 0)
            .map_or(ReconfigurationCommand::None, |(index, _)| {
                ReconfigurationCommand::Remove(index)
            });

        if score > self.boundary {
            self.switch_to(ReconfigurationMode::Adding);
        }
        command
    }

    fn switch_to(&mut self, mode: ReconfigurationMode) {
        if self.mode != mode {
            tracing::debug!("Task farm reconfiguration mode: {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(max_cores: usize, max_samples: u32) -> ReconfigurationCommandService {
        ReconfigurationCommandService::new(&TaskFarmConfiguration {
            max_number_of_cores: max_cores,
            max_samples_until_remove: max_samples,
            throughput_score_boundary: 0.2,
            ..Default::default()
        })
    }

    /// Applies `command` to a simulated worker list.
    fn apply(workers: &mut Vec<usize>, command: ReconfigurationCommand) {
        match command {
            ReconfigurationCommand::Add => workers.push(0),
            ReconfigurationCommand::Remove(index) => {
                workers.remove(index);
            }
            ReconfigurationCommand::None => {}
        }
    }

    #[test]
    fn test_rising_scores_add_until_core_limit() {
        let mut service = service(4, 3);
        let mut workers = vec![5];
        let mut adds = 0;
        for step in 0..10 {
            let command = service.decide(0.5 + step as f64 * 0.1, &workers);
            if command == ReconfigurationCommand::Add {
                adds += 1;
            }
            apply(&mut workers, command);
            if service.mode() == ReconfigurationMode::Removing {
                break;
            }
        }
        assert_eq!(adds, 3);
        assert_eq!(workers.len(), 4);
        assert_eq!(service.mode(), ReconfigurationMode::Removing);
    }

    #[test]
    fn test_invalid_score_waits() {
        let mut service = service(4, 3);
        assert_eq!(service.decide(INVALID_SCORE, &[0]), ReconfigurationCommand::None);
        assert_eq!(service.samples_until_remove(), INIT_SAMPLES_UNTIL_REMOVE);
    }

    #[test]
    fn test_no_gain_removes_newest_worker() {
        let mut service = service(8, 2);
        assert_eq!(service.decide(0.0, &[1]), ReconfigurationCommand::Add);
        assert_eq!(service.decide(0.0, &[1, 1]), ReconfigurationCommand::None);
        assert_eq!(service.decide(0.0, &[1, 1]), ReconfigurationCommand::None);
        assert_eq!(service.decide(0.0, &[1, 1]), ReconfigurationCommand::Remove(1));
        assert_eq!(service.mode(), ReconfigurationMode::Removing);
    }

    #[test]
    fn test_removing_skips_first_worker() {
        let mut service = service(1, 3);
        assert_eq!(service.decide(0.0, &[0]), ReconfigurationCommand::None);
        assert_eq!(service.mode(), ReconfigurationMode::Removing);
        assert_eq!(service.decide(0.0, &[0]), ReconfigurationCommand::None);
        assert_eq!(service.decide(0.0, &[0, 3, 0]), ReconfigurationCommand::Remove(2));
    }

    #[test]
    fn test_high_score_returns_to_adding() {
        let mut service = service(2, 3);
        assert_eq!(service.decide(0.0, &[1, 1]), ReconfigurationCommand::None);
        assert_eq!(service.mode(), ReconfigurationMode::Removing);
        assert_eq!(service.decide(0.9, &[1, 1]), ReconfigurationCommand::None);
        assert_eq!(service.mode(), ReconfigurationMode::Adding);
    }
}
