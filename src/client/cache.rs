//! Short-TTL response cache.
//!
//! Entries are keyed by [`Command::cache_key`](crate::protocol::Command::cache_key)
//! and never returned once their expiry has passed. Expired entries are
//! dropped lazily on lookup and eagerly by a periodic sweep.
//!
//! Every [`clear`](ResponseCache::clear) advances a generation counter. A
//! read captures the generation before it starts and stores its result with
//! [`insert_if_current`](ResponseCache::insert_if_current), so a result
//! fetched before a mutation is never cached after it.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::clock::{Clock, SharedClock, SystemClock, Ticker};

// ============================================================================
// CacheEntry
// ============================================================================

/// A cached value and its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached result.
    pub value: Value,
    /// First instant at which the entry is stale.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Returns `true` if the entry may still be served at `now`.
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

// ============================================================================
// ResponseCache
// ============================================================================

/// Thread-safe TTL cache of command results.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<FxHashMap<String, CacheEntry>>>,
    generation: Arc<AtomicU64>,
    clock: SharedClock,
}

impl ResponseCache {
    /// Creates an empty cache on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty cache on a custom clock.
    #[must_use]
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(RwLock::new(FxHashMap::default())),
            generation: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    /// Number of stored entries, fresh or not.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the value for `key` if it has not expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_fresh(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !e.is_fresh(now)) {
            entries.remove(key);
            trace!(key, "Dropped expired cache entry");
        }
        None
    }

    /// Stores `value` under `key` for `ttl`.
    pub fn insert(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .write()
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Current generation; changes on every [`clear`](Self::clear).
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores `value` only if no [`clear`](Self::clear) happened since
    /// `generation` was read. Returns whether it was stored.
    pub fn insert_if_current(
        &self,
        key: impl Into<String>,
        value: Value,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != generation {
            trace!("Discarded result fetched before invalidation");
            return false;
        }
        entries.insert(key.into(), CacheEntry { value, expires_at });
        true
    }

    /// Removes one key.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !entries.is_empty() {
            debug!(count = entries.len(), "Cleared response cache");
        }
        entries.clear();
    }

    /// Drops expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    /// Spawns the periodic sweep; it stops when `cancel` fires or the ticker
    /// is exhausted.
    pub fn spawn_sweeper<K>(&self, mut ticker: K, cancel: CancellationToken) -> JoinHandle<()>
    where
        K: Ticker + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                let ticked = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ticked = ticker.tick() => ticked,
                };
                if !ticked {
                    break;
                }
                let removed = cache.purge_expired();
                if removed > 0 {
                    trace!(removed, "Cache sweep");
                }
            }
            debug!("Cache sweeper stopped");
        })
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::client::clock::{ManualClock, ManualTicker};

    fn cache() -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResponseCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_entry_served_until_expiry() {
        let (cache, clock) = cache();
        cache.insert("list_tabs", json!(["a.1.2\tx\ty"]), Duration::from_secs(10));

        clock.advance(Duration::from_secs(9));
        assert!(cache.get("list_tabs").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("list_tabs").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (cache, _clock) = cache();
        cache.insert("a", json!(1), Duration::from_secs(10));
        cache.insert("b", json!(2), Duration::from_secs(10));

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(json!(2)));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_after_clear_is_discarded() {
        let (cache, _clock) = cache();
        let before = cache.generation();
        cache.clear();

        assert!(!cache.insert_if_current("list_tabs", json!(["old"]), Duration::from_secs(10), before));
        assert!(cache.get("list_tabs").is_none());

        let now = cache.generation();
        assert!(cache.insert_if_current("list_tabs", json!(["new"]), Duration::from_secs(10), now));
        assert_eq!(cache.get("list_tabs"), Some(json!(["new"])));
    }

    #[test]
    fn test_purge_expired_keeps_fresh() {
        let (cache, clock) = cache();
        cache.insert("short", json!(1), Duration::from_secs(10));
        cache.insert("long", json!(2), Duration::from_secs(300));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_sweeper_runs_on_tick_and_stops_on_cancel() {
        let (cache, clock) = cache();
        cache.insert("short", json!(1), Duration::from_secs(10));
        clock.advance(Duration::from_secs(11));

        let (ticker, handle) = ManualTicker::new();
        let cancel = CancellationToken::new();
        let task = cache.spawn_sweeper(ticker, cancel.clone());

        handle.fire();
        for _ in 0..100 {
            if cache.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cache.is_empty());

        cancel.cancel();
        task.await.expect("sweeper exits");
    }
}
