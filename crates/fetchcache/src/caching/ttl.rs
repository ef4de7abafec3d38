use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::CacheKey;

/// A successful response held in the [`TtlStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// Returns `true` if the entry has been inserted less than `ttl` ago.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }

    /// The time elapsed since the entry was inserted.
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }
}

/// A map of cached responses with lazy freshness checks.
#[derive(Debug)]
pub struct TtlStore<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
}

impl<T> Default for TtlStore<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> TtlStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`, returning its value and whether it is still fresh.
    pub fn get(&self, key: &CacheKey) -> Option<(&T, bool)> {
        self.entries
            .get(key)
            .map(|entry| (&entry.value, entry.is_fresh()))
    }

    /// Looks up `key`, ignoring stale entries.
    pub fn get_fresh(&self, key: &CacheKey) -> Option<&CacheEntry<T>> {
        self.entries.get(key).filter(|entry| entry.is_fresh())
    }

    /// Returns the entry for `key`, whether fresh or stale.
    pub fn entry(&self, key: &CacheKey) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    /// Inserts `value`, superseding whatever was stored for `key` before.
    pub fn put(&mut self, key: CacheKey, value: T, ttl: Duration) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        self.entries.insert(key, entry);
    }

    /// The number of entries, including stale ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
