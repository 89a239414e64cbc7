//! Replay Cache for Knock Replay Protection
//!
//! This module implements a fixed-capacity ring of recently seen nonces,
//! providing protection against replayed knocks beyond the basic timestamp
//! window validation.
//!
//! Entries expire after a TTL and are cleared opportunistically while
//! scanning, so the cache never grows beyond its configured capacity.

use std::time::Duration;
use tracing::{debug, warn};

/// A seen nonce and when it was registered.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The `"<timestamp>-<challenge>"` replay key.
    nonce: String,
    /// Unix seconds when the entry was added.
    seen_at: u64,
}

/// Fixed-capacity replay cache with TTL expiry and FIFO overwrite.
///
/// The write index increments modulo capacity on every add - the ring is
/// not content-addressed, so once more knocks than `capacity` arrive
/// inside one TTL window, still-valid entries get overwritten in FIFO
/// order. The worst case is a false negative that re-admits an evicted
/// nonce; acceptable while knock volume stays well below capacity per TTL
/// window, and both knobs are exposed in server configuration.
#[derive(Debug)]
pub struct ReplayCache {
    /// Ring storage; `None` marks a free or expired slot.
    slots: Vec<Option<CacheEntry>>,
    /// Next write position, wraps modulo capacity.
    next: usize,
    /// Time-to-live for cache entries.
    ttl: Duration,
}

/// Default number of ring slots.
pub const DEFAULT_CAPACITY: usize = 128;

/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

impl ReplayCache {
    /// Create a replay cache with default settings (128 slots, 60 s TTL).
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Create a replay cache with custom capacity and TTL.
    pub fn with_settings(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            next: 0,
            ttl,
        }
    }

    /// Check whether a nonce has been seen inside the TTL window.
    ///
    /// Returns true if the nonce is a replay. Expired entries encountered
    /// during the scan are cleared and never match.
    pub fn check(&mut self, nonce: &str, now: u64) -> bool {
        let ttl = self.ttl.as_secs();
        for slot in &mut self.slots {
            let Some(entry) = slot else { continue };

            if now.saturating_sub(entry.seen_at) > ttl {
                *slot = None;
                continue;
            }

            if entry.nonce == nonce {
                warn!(nonce, "Replay detected - nonce already cached");
                return true;
            }
        }
        false
    }

    /// Register a nonce at the current ring position.
    ///
    /// Overwrites whatever occupies the slot, expired or not.
    pub fn add(&mut self, nonce: &str, now: u64) {
        self.slots[self.next] = Some(CacheEntry {
            nonce: nonce.to_string(),
            seen_at: now,
        });
        self.next = (self.next + 1) % self.slots.len();
        debug!(nonce, "Nonce cached");
    }

    /// Wipe all entries and reset the write position.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
        debug!("Replay cache cleared");
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            occupied: self.slots.iter().filter(|s| s.is_some()).count(),
            capacity: self.slots.len(),
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the replay cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Slots currently holding an entry (expired or not).
    pub occupied: usize,
    /// Total ring slots.
    pub capacity: usize,
    /// TTL in seconds.
    pub ttl_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_replay_detected() {
        let mut cache = ReplayCache::new();
        let now = 1000;

        assert!(!cache.check("1000-42", now));
        cache.add("1000-42", now);
        assert!(cache.check("1000-42", now));
    }

    #[test]
    fn test_different_nonce_allowed() {
        let mut cache = ReplayCache::new();
        let now = 1000;

        cache.add("1000-42", now);
        assert!(!cache.check("1000-43", now));
        assert!(!cache.check("1001-42", now));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ReplayCache::with_settings(8, Duration::from_secs(60));
        let now = 1000;

        cache.add("1000-42", now);
        assert!(cache.check("1000-42", now + 60), "inside TTL still counts");
        assert!(!cache.check("1000-42", now + 61), "expired entry is not a replay");
    }

    #[test]
    fn test_expired_entries_cleared_during_scan() {
        let mut cache = ReplayCache::with_settings(4, Duration::from_secs(60));
        cache.add("a", 1000);
        cache.add("b", 1000);

        assert!(!cache.check("a", 2000));
        assert_eq!(cache.stats().occupied, 0, "scan clears expired slots");
    }

    #[test]
    fn test_fifo_overwrite_past_capacity() {
        let mut cache = ReplayCache::with_settings(2, Duration::from_secs(60));
        let now = 1000;

        cache.add("a", now);
        cache.add("b", now);
        cache.add("c", now); // overwrites "a" even though it has not expired

        assert!(!cache.check("a", now), "oldest entry was evicted early");
        assert!(cache.check("b", now));
        assert!(cache.check("c", now));
    }

    #[test]
    fn test_clear() {
        let mut cache = ReplayCache::new();
        cache.add("a", 1000);
        cache.clear();
        assert!(!cache.check("a", 1000));
        assert_eq!(cache.stats().occupied, 0);
    }
}
