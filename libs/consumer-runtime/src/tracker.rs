//! In-memory retry accounting for deliveries.
//!
//! AMQP assigns a fresh delivery tag on every redelivery, so counters are
//! keyed by the envelope's `event_id`, which is stable across requeues
//! within one process. The map is memory-only and bounded: entries are
//! removed on ack or DLQ routing, stale entries are pruned on insert, and
//! counters reset on restart — the broker's redelivered flag is diagnostics,
//! not a correctness input.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Prune entries older than this; a delivery stuck longer than an hour has
/// long since been requeued to another consumer or dead-lettered.
fn stale_after() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub attempts: u32,
    pub first_attempt: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AttemptTracker {
    entries: HashMap<Uuid, AttemptState>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return the updated state.
    pub fn record_failure(&mut self, event_id: Uuid, now: DateTime<Utc>) -> AttemptState {
        self.prune(now);
        let state = self.entries.entry(event_id).or_insert(AttemptState {
            attempts: 0,
            first_attempt: now,
        });
        state.attempts += 1;
        *state
    }

    /// Drop accounting for a delivery that was acked or dead-lettered.
    pub fn clear(&mut self, event_id: Uuid) {
        self.entries.remove(&event_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, state| now - state.first_attempt < stale_after());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_accumulate_per_event() {
        let mut tracker = AttemptTracker::new();
        let event_id = Uuid::new_v4();
        let now = Utc::now();

        assert_eq!(tracker.record_failure(event_id, now).attempts, 1);
        assert_eq!(tracker.record_failure(event_id, now).attempts, 2);
        assert_eq!(tracker.record_failure(event_id, now).attempts, 3);

        let other = Uuid::new_v4();
        assert_eq!(tracker.record_failure(other, now).attempts, 1);
    }

    #[test]
    fn test_first_attempt_timestamp_is_kept() {
        let mut tracker = AttemptTracker::new();
        let event_id = Uuid::new_v4();
        let first = Utc::now();

        tracker.record_failure(event_id, first);
        let state = tracker.record_failure(event_id, first + Duration::seconds(10));
        assert_eq!(state.first_attempt, first);
    }

    #[test]
    fn test_clear_removes_entry() {
        let mut tracker = AttemptTracker::new();
        let event_id = Uuid::new_v4();
        tracker.record_failure(event_id, Utc::now());
        tracker.clear(event_id);
        assert!(tracker.is_empty());
        // A later failure starts over.
        assert_eq!(tracker.record_failure(event_id, Utc::now()).attempts, 1);
    }

    #[test]
    fn test_stale_entries_are_pruned() {
        let mut tracker = AttemptTracker::new();
        let stale = Uuid::new_v4();
        let now = Utc::now();

        tracker.record_failure(stale, now - Duration::hours(2));
        assert_eq!(tracker.len(), 1);

        // Any new failure prunes entries past the staleness window.
        tracker.record_failure(Uuid::new_v4(), now);
        assert_eq!(tracker.len(), 1);
    }
}
