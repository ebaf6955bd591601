//! Idempotency / circular-reference guard
//!
//! The classic echo problem: updating the schedule store in response to a
//! meeting event can re-notify the meeting store, which re-notifies the
//! schedule store, forever. Every handler that can directly or indirectly
//! cause another emission of the same logical change calls
//! [`IdempotencyGuard::should_process`] first.
//!
//! Entries are evicted after a bounded time window or bounded count. Event
//! ids are globally unique UUIDs, so a false "duplicate" verdict for a
//! genuinely new event cannot happen; a missed echo after the window closes
//! is the accepted trade-off.

use crate::identifiers::EventId;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default retention window for seen event ids
pub const DEFAULT_WINDOW_SECS: i64 = 300;

/// Default capacity of the seen-id cache
pub const DEFAULT_CAPACITY: usize = 4096;

/// Per-event-id echo detector
pub struct IdempotencyGuard {
    seen: Mutex<LruCache<EventId, DateTime<Utc>>>,
    window: Duration,
}

impl IdempotencyGuard {
    /// Guard with default capacity and window
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, Duration::seconds(DEFAULT_WINDOW_SECS))
    }

    /// Guard with explicit capacity and retention window
    pub fn with_limits(capacity: usize, window: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            window,
        }
    }

    /// First call for an id returns `true` and marks it seen; repeats within
    /// the retention window return `false`.
    pub fn should_process(&self, event_id: &EventId) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().expect("guard lock poisoned");
        if let Some(seen_at) = seen.get(event_id) {
            if now - *seen_at < self.window {
                return false;
            }
        }
        seen.put(*event_id, now);
        true
    }

    /// Number of ids currently tracked
    pub fn seen_len(&self) -> usize {
        self.seen.lock().expect("guard lock poisoned").len()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.seen.lock().expect("guard lock poisoned").clear();
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_true_then_false() {
        let guard = IdempotencyGuard::new();
        let id = EventId::new();
        assert!(guard.should_process(&id));
        assert!(!guard.should_process(&id));
        assert!(!guard.should_process(&id));
        assert_eq!(guard.seen_len(), 1);
    }

    #[test]
    fn test_distinct_ids_are_independent() {
        let guard = IdempotencyGuard::new();
        for _ in 0..100 {
            assert!(guard.should_process(&EventId::new()));
        }
        assert_eq!(guard.seen_len(), 100);
    }

    #[test]
    fn test_capacity_bounds_growth() {
        let guard = IdempotencyGuard::with_limits(8, Duration::seconds(300));
        for _ in 0..100 {
            guard.should_process(&EventId::new());
        }
        assert!(guard.seen_len() <= 8);
    }

    #[test]
    fn test_expired_entry_is_treated_as_new() {
        let guard = IdempotencyGuard::with_limits(16, Duration::zero());
        let id = EventId::new();
        assert!(guard.should_process(&id));
        // Window of zero: the entry is already expired on the next call
        assert!(guard.should_process(&id));
    }

    #[test]
    fn test_clear_resets_state() {
        let guard = IdempotencyGuard::new();
        let id = EventId::new();
        assert!(guard.should_process(&id));
        guard.clear();
        assert_eq!(guard.seen_len(), 0);
        assert!(guard.should_process(&id));
    }
}
