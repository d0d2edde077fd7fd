//! Fixed-size window of the most recent output lines

use std::collections::VecDeque;
use std::sync::Mutex;

use super::types::ObservedLine;

/// Keeps the last `capacity` lines, dropping the oldest on overflow.
///
/// Written only by the observer's producer task; readers take snapshots.
#[derive(Debug)]
pub struct TailBuffer {
    lines: Mutex<VecDeque<ObservedLine>>,
    capacity: usize,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, line: ObservedLine) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ObservedLine> {
        self.lock().iter().cloned().collect()
    }

    /// Lines with `seq <= up_to`, oldest first
    pub fn snapshot_through(&self, up_to: u64) -> Vec<ObservedLine> {
        self.lock()
            .iter()
            .filter(|line| line.seq <= up_to)
            .cloned()
            .collect()
    }

    /// Lines with `from <= seq < until`, oldest first
    pub fn snapshot_range(&self, from: u64, until: u64) -> Vec<ObservedLine> {
        self.lock()
            .iter()
            .filter(|line| (from..until).contains(&line.seq))
            .cloned()
            .collect()
    }

    /// Text of the retained lines, oldest first
    pub fn texts(&self) -> Vec<String> {
        self.lock().iter().map(|line| line.text.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ObservedLine>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
