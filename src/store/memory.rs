//! In-process counter store.
//!
//! Mirrors the Redis contract closely enough to stand in for it in tests
//! and single-node deployments. Expiry uses `tokio::time::Instant`, so tests
//! can drive windows forward with a paused clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, StoreError};

/// A single fixed-window counter.
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

impl Counter {
    fn starting(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now.checked_add(window).unwrap_or(now + MAX_EXPIRY),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Expired counters are swept after this many increments.
const SWEEP_INTERVAL: u64 = 1024;

/// Cap on expiry for windows too long to add to the clock.
const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 86400);

/// Counter store backed by a concurrent hash map.
///
/// Each increment runs under the map's shard lock for that key, which gives
/// the same read-modify-write atomicity as a Redis `INCR`.
/// Counters that expire are dropped by a periodic sweep, so a stream of
/// one-off identities does not grow the map without bound.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
    increments: AtomicU64,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) counters.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Whether the store holds no live counters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired counter, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        let removed = before.saturating_sub(self.counters.len());

        if removed > 0 {
            debug!(removed, "Swept expired in-memory counters");
        }
        removed
    }

    /// Current count for `key`, if a live counter exists.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.count)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        // Sweep before taking the entry guard; `retain` locks every shard
        let seen = self.increments.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if seen % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Counter::starting(now, window));

        if entry.is_expired(now) {
            *entry = Counter::starting(now, window);
        }
        entry.count += 1;

        let count = entry.count;
        drop(entry);

        trace!(key = %key, count, "Incremented in-memory counter");
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.expires_at - now))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .counters
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut deleted = 0;
        for key in keys {
            if let Some((_, counter)) = self.counters.remove(key) {
                if !counter.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Redis-style glob matching supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("auth:*", "auth:10.0.0.1"));
        assert!(glob_match("auth:*", "auth:"));
        assert!(!glob_match("auth:*", "general:10.0.0.1"));
        assert!(!glob_match("auth:*", "authx:1"));
        assert!(glob_match("u?er:*", "user:42"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*:42", "user:42"));
        assert!(!glob_match("*:42", "user:43"));
    }

    #[tokio::test]
    async fn test_increment_creates_and_counts() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.increment("general:a", window).await.unwrap(), 1);
        assert_eq!(store.increment("general:a", window).await.unwrap(), 2);
        assert_eq!(store.increment("general:b", window).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_is_not_extended_by_increments() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);

        store.increment("k", window).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        store.increment("k", window).await.unwrap();

        let ttl = store.ttl("k").await.unwrap().unwrap();
        assert_eq!(ttl, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_expires_after_window() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(10);

        store.increment("k", window).await.unwrap();
        store.increment("k", window).await.unwrap();
        tokio::time::advance(window).await;

        assert_eq!(store.ttl("k").await.unwrap(), None);
        assert_eq!(store.count("k"), None);
        assert_eq!(store.increment("k", window).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_drops_only_dead_counters() {
        let store = MemoryCounterStore::new();

        store.increment("a", Duration::from_secs(10)).await.unwrap();
        store.increment("b", Duration::from_secs(10)).await.unwrap();
        store.increment("c", Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.counters.len(), 1);
        assert_eq!(store.count("c"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increments_sweep_one_off_identities() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(1);

        for i in 0..SWEEP_INTERVAL {
            store.increment(&format!("general:{}", i), window).await.unwrap();
        }
        tokio::time::advance(window).await;

        // Each new identity is a fresh key; the map must not keep growing
        for i in 0..SWEEP_INTERVAL {
            store.increment(&format!("general:new-{}", i), window).await.unwrap();
        }

        assert!(store.counters.len() <= SWEEP_INTERVAL as usize);
        assert_eq!(store.len(), SWEEP_INTERVAL as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_window_is_capped() {
        let store = MemoryCounterStore::new();

        store.increment("k", Duration::MAX).await.unwrap();
        assert_eq!(store.increment("k", Duration::MAX).await.unwrap(), 2);
        assert_eq!(store.ttl("k").await.unwrap(), Some(MAX_EXPIRY));
    }

    #[tokio::test]
    async fn test_keys_matching_and_delete() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);

        for key in ["auth:1", "auth:2", "general:1"] {
            store.increment(key, window).await.unwrap();
        }

        let mut keys = store.keys_matching("auth:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["auth:1".to_string(), "auth:2".to_string()]);

        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert!(store.keys_matching("auth:*").await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_keys() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.delete(&["nope".to_string()]).await.unwrap(), 0);
        assert_eq!(store.delete(&[]).await.unwrap(), 0);
    }
}
