use crate::position::canonical_entity_id;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;

/// Online/offline status for an entity, derived from last-fix age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Tracks the wall-clock time of the last accepted fix per entity.
///
/// An entity is Online while its last fix is younger than the configured
/// threshold. State is in-memory only and rebuilt from live traffic after a
/// restart.
pub struct PresenceTracker {
    last_seen: DashMap<String, DateTime<Utc>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            last_seen: DashMap::new(),
        }
    }

    /// Record an accepted fix for an entity.
    pub fn record(&self, entity_id: &str) {
        self.last_seen
            .insert(canonical_entity_id(entity_id), Utc::now());
    }

    /// Status of one entity. Entities never seen are Offline.
    pub fn status(&self, entity_id: &str, offline_after_seconds: i64) -> PresenceStatus {
        let threshold = Utc::now() - Duration::seconds(offline_after_seconds);
        match self.last_seen.get(&canonical_entity_id(entity_id)) {
            Some(seen) if *seen > threshold => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        }
    }

    /// Status map for every entity seen so far.
    pub fn statuses(&self, offline_after_seconds: i64) -> HashMap<String, PresenceStatus> {
        let threshold = Utc::now() - Duration::seconds(offline_after_seconds);
        self.last_seen
            .iter()
            .map(|entry| {
                let status = if *entry.value() > threshold {
                    PresenceStatus::Online
                } else {
                    PresenceStatus::Offline
                };
                (entry.key().clone(), status)
            })
            .collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_entity_is_offline() {
        let tracker = PresenceTracker::new();
        assert_eq!(tracker.status("sur009", 300), PresenceStatus::Offline);
    }

    #[test]
    fn test_recent_fix_is_online() {
        let tracker = PresenceTracker::new();
        tracker.record("sur009");
        assert_eq!(tracker.status("sur009", 300), PresenceStatus::Online);
    }

    #[test]
    fn test_zero_threshold_marks_offline() {
        let tracker = PresenceTracker::new();
        tracker.record("sur009");
        // A fix recorded "now" is not younger than a zero-second threshold
        assert_eq!(tracker.status("sur009", 0), PresenceStatus::Offline);
    }

    #[test]
    fn test_status_keys_are_canonical() {
        let tracker = PresenceTracker::new();
        tracker.record("SUR009");
        assert_eq!(tracker.status("sur009", 300), PresenceStatus::Online);

        let statuses = tracker.statuses(300);
        assert!(statuses.contains_key("sur009"));
        assert_eq!(statuses.len(), 1);
    }
}
