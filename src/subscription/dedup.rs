use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Bounded recency window over observation timestamps.
///
/// A push update and a poll tick can fetch the same fix; each subscription
/// keys dedup on `(entity_id, observed_at)`, and since a window belongs to
/// exactly one subscription the timestamp alone identifies the fix. Only
/// the last `capacity` timestamps are remembered; unbounded history is not
/// required.
pub struct DedupWindow {
    seen: VecDeque<DateTime<Utc>>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Returns true if the timestamp is new (deliver), false if it was
    /// already seen within the window (suppress).
    pub fn insert(&mut self, observed_at: DateTime<Utc>) -> bool {
        if self.seen.contains(&observed_at) {
            return false;
        }
        self.seen.push_back(observed_at);
        while self.seen.len() > self.capacity {
            self.seen.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
