//! Recent-event history
//!
//! Keeps a bounded trail of already-classified events so the classifier can
//! see how often the same kind of problem has shown up lately.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ProblemType;

/// Default number of classified events retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// A classified event remembered for frequency analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEvent {
    pub event_id: String,
    pub problem_type: ProblemType,
    pub timestamp: DateTime<Utc>,
}

/// Bounded FIFO of recently classified events
#[derive(Debug, Clone)]
pub struct EventHistory {
    entries: VecDeque<RecentEvent>,
    capacity: usize,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Remember a classified event, evicting the oldest when full
    pub fn push(&mut self, entry: RecentEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> &VecDeque<RecentEvent> {
        &self.entries
    }

    /// Snapshot of the retained entries as a contiguous slice-friendly vec
    pub fn snapshot(&self) -> Vec<RecentEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new()
    }
}
