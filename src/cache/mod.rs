//! In-memory TTL cache keyed by request fingerprint.
//!
//! A plain data structure: no I/O, no background sweeping. Expired entries are treated
//! as absent and removed lazily on lookup; [`TtlCache::purge_expired`] is available
//! when a caller wants to reclaim memory eagerly.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    fn expires_at(&self) -> Instant {
        self.stored_at + self.ttl
    }
}

/// A map from fingerprint key to payload with a per-entry time-to-live.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    capacity: Option<usize>,
}

impl<V: Clone> TtlCache<V> {
    /// Creates an unbounded cache with the given default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            capacity: None,
        }
    }

    /// Bounds the number of stored entries.
    #[must_use]
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// The TTL used when [`insert`](Self::insert) is called without one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns a fresh entry, removing it if it has expired.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        let fresh = self.entries.get(key)?.is_fresh(now);
        if fresh {
            self.entries.get(key).map(|e| e.payload.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    /// Stores a payload. `None` uses the default TTL; a zero TTL stores nothing.
    pub fn insert(&mut self, key: impl Into<String>, payload: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }
        let key = key.into();
        if let Some(cap) = self.capacity
            && !self.entries.contains_key(&key)
            && self.entries.len() >= cap
        {
            self.make_room(cap);
        }
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Removes an entry regardless of freshness.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|e| e.payload)
    }

    /// Removes every entry whose key contains `pattern`. Returns how many were removed.
    pub fn invalidate_matching(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.contains(pattern));
        before - self.entries.len()
    }

    /// Drops all expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_fresh(now));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Expired entries go first; if that is not enough, the one closest to expiry.
    fn make_room(&mut self, cap: usize) {
        self.purge_expired();
        while self.entries.len() >= cap {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at())
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }
}
