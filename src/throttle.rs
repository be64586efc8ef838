//! Announcement de-duplication
//!
//! One entry per announcement key, each with its own expiry. Expiry is lazy:
//! an entry is only checked (and replaced) when the key is acquired again,
//! and expired entries are swept once the map reaches [`PURGE_AT`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Entry count that triggers a sweep of expired entries
pub const PURGE_AT: usize = 256;

/// Identifies "what was said" (e.g. `sighting:cup`, `held:person-0:knife`)
pub type AnnouncementKey = String;

/// Keeps the same fact from being announced again within its cooldown
#[derive(Debug, Default)]
pub struct AnnouncementThrottle {
    entries: HashMap<AnnouncementKey, Instant>,
}

impl AnnouncementThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` for `cooldown` starting now
    pub fn try_acquire(&mut self, key: &str, cooldown: Duration) -> bool {
        self.try_acquire_at(key, cooldown, Instant::now())
    }

    /// Acquire `key` for `cooldown` starting at `now`
    ///
    /// Returns `true` and records the key when no live entry exists. A second
    /// call within the same tick sees the fresh entry and returns `false`.
    pub fn try_acquire_at(&mut self, key: &str, cooldown: Duration, now: Instant) -> bool {
        if let Some(expires_at) = self.entries.get(key) {
            if now < *expires_at {
                return false;
            }
        }

        if self.entries.len() >= PURGE_AT {
            self.purge_expired(now);
        }
        self.entries.insert(key.to_string(), now + cooldown);
        true
    }

    /// Whether `key` is currently held
    #[must_use]
    pub fn is_live_at(&self, key: &str, now: Instant) -> bool {
        self.entries.get(key).is_some_and(|expires_at| now < *expires_at)
    }

    /// Expiry of the entry for `key`, live or not
    #[must_use]
    pub fn expires_at(&self, key: &str) -> Option<Instant> {
        self.entries.get(key).copied()
    }

    /// Force-expire one entry
    pub fn release(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            tracing::trace!(key, "throttle entry released");
        }
    }

    /// Drop every entry (system stop)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries that expired before `now`
    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, expires_at| now < *expires_at);
    }

    /// Number of stored entries, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_within_cooldown_then_after() {
        let mut throttle = AnnouncementThrottle::new();
        let t0 = Instant::now();
        let cooldown = Duration::from_millis(7000);

        assert!(throttle.try_acquire_at("sighting:cup", cooldown, t0));
        assert!(!throttle.try_acquire_at("sighting:cup", cooldown, t0 + Duration::from_millis(6999)));
        assert!(throttle.try_acquire_at("sighting:cup", cooldown, t0 + cooldown));
    }

    #[test]
    fn test_same_tick_does_not_double_fire() {
        let mut throttle = AnnouncementThrottle::new();
        let now = Instant::now();
        assert!(throttle.try_acquire_at("sighting:cup", Duration::from_secs(7), now));
        assert!(!throttle.try_acquire_at("sighting:cup", Duration::from_secs(7), now));
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let mut throttle = AnnouncementThrottle::new();
        let now = Instant::now();
        assert!(throttle.try_acquire_at("sighting:cup", Duration::from_secs(7), now));
        assert!(throttle.try_acquire_at("sighting:book", Duration::from_secs(7), now));
        assert_eq!(throttle.len(), 2);
    }

    #[test]
    fn test_release_and_clear() {
        let mut throttle = AnnouncementThrottle::new();
        let now = Instant::now();
        throttle.try_acquire_at("a", Duration::from_secs(10), now);
        throttle.try_acquire_at("b", Duration::from_secs(10), now);

        throttle.release("a");
        assert!(!throttle.is_live_at("a", now));
        assert!(throttle.try_acquire_at("a", Duration::from_secs(10), now));

        throttle.clear();
        assert!(throttle.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let mut throttle = AnnouncementThrottle::new();
        let now = Instant::now();
        throttle.try_acquire_at("short", Duration::from_secs(1), now);
        throttle.try_acquire_at("long", Duration::from_secs(10), now);

        throttle.purge_expired(now + Duration::from_secs(2));
        assert_eq!(throttle.len(), 1);
        assert!(throttle.is_live_at("long", now + Duration::from_secs(2)));
    }

    #[test]
    fn test_expired_entries_swept_at_capacity() {
        let mut throttle = AnnouncementThrottle::new();
        let now = Instant::now();
        for i in 0..PURGE_AT {
            assert!(throttle.try_acquire_at(&format!("sighting:{i}"), Duration::from_secs(1), now));
        }
        throttle.try_acquire_at("held", Duration::from_secs(60), now);
        assert_eq!(throttle.len(), PURGE_AT + 1);

        let later = now + Duration::from_secs(2);
        assert!(throttle.try_acquire_at("sighting:new", Duration::from_secs(1), later));
        assert_eq!(throttle.len(), 2);
        assert!(throttle.is_live_at("held", later));
    }
}
