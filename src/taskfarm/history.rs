//! Throughput history of a task farm.
//!
//! Each adaptation iteration sums the push throughput of all worker input
//! pipes into one [`ThroughputEntry`]. The history keeps the newest entries
//! first and forgets the oldest once full.

use std::collections::VecDeque;

/// One measurement of the farm's total throughput.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputEntry {
    /// Milliseconds since the adaptation thread started
    pub timestamp: f64,
    /// Sum of the push throughput of every worker input pipe
    pub throughput: f64,
}

/// Fixed-size, newest-first window of [`ThroughputEntry`]s.
#[derive(Debug, Clone)]
pub struct ThroughputHistory {
    entries: VecDeque<ThroughputEntry>,
    capacity: usize,
}

impl ThroughputHistory {
    /// A history able to analyse `window` previous entries against the newest one.
    pub fn for_window(window: usize) -> Self {
        Self::with_capacity(window + 1)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(&mut self, timestamp: f64, throughput: f64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(ThroughputEntry {
            timestamp,
            throughput,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry `index`, where 0 is the newest.
    pub fn entry(&self, index: usize) -> Option<&ThroughputEntry> {
        self.entries.get(index)
    }

    pub fn timestamp_of_entry(&self, index: usize) -> f64 {
        self.entries.get(index).map_or(0.0, |e| e.timestamp)
    }

    pub fn throughput_of_entry(&self, index: usize) -> f64 {
        self.entries.get(index).map_or(0.0, |e| e.throughput)
    }

    /// Entries newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ThroughputEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_entry_first() {
        let mut history = ThroughputHistory::with_capacity(3);
        history.add(0.0, 10.0);
        history.add(50.0, 20.0);
        assert_eq!(history.throughput_of_entry(0), 20.0);
        assert_eq!(history.timestamp_of_entry(1), 0.0);
        assert!(!history.is_full());
    }

    #[test]
    fn test_oldest_entry_dropped_when_full() {
        let mut history = ThroughputHistory::for_window(2);
        for i in 0..5 {
            history.add(i as f64, i as f64 * 10.0);
        }
        assert!(history.is_full());
        assert_eq!(history.len(), 3);
        let throughputs: Vec<f64> = history.iter().map(|e| e.throughput).collect();
        assert_eq!(throughputs, vec![40.0, 30.0, 20.0]);
        assert!(history.entry(3).is_none());
    }
}
