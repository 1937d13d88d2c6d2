//! Rolling window of dispatched actions shared across runs

use std::collections::VecDeque;
use std::time::Duration;

use autobot_core_types::Params;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::model::PolicyRequest;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub adapter: String,
    pub action: String,
    pub params: Params,
    pub at: Instant,
}

impl HistoryEntry {
    pub fn from_request(request: &PolicyRequest, at: Instant) -> Self {
        Self {
            adapter: request.adapter.clone(),
            action: request.action.clone(),
            params: request.params.clone(),
            at,
        }
    }
}

/// Bounded by both age and entry count.
pub struct ActionHistory {
    entries: Mutex<VecDeque<HistoryEntry>>,
    retention: Duration,
    capacity: usize,
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_CAPACITY)
    }
}

impl ActionHistory {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retention,
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, request: &PolicyRequest, at: Instant) {
        let mut entries = self.entries.lock();
        entries.push_back(HistoryEntry::from_request(request, at));
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        prune(&mut entries, at, self.retention);
    }

    /// Entries still inside the retention window at `now`, oldest first.
    pub fn snapshot(&self, now: Instant) -> Vec<HistoryEntry> {
        let mut entries = self.entries.lock();
        prune(&mut entries, now, self.retention);
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn prune(entries: &mut VecDeque<HistoryEntry>, now: Instant, retention: Duration) {
    while let Some(front) = entries.front() {
        if now.saturating_duration_since(front.at) > retention {
            entries.pop_front();
        } else {
            break;
        }
    }
}
