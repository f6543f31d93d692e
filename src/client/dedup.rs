//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one underlying request.
//! The pending entry is removed by the request itself when it completes, so
//! a caller arriving afterwards starts a fresh request.
//!
//! [`forget_all`](Deduplicator::forget_all) detaches every pending request:
//! callers already waiting keep their result, later callers start anew. Each
//! request carries an id so a detached request never removes its successor.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

type SharedRequest<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

type PendingMap<T> = Arc<RwLock<FxHashMap<String, (u64, SharedRequest<T>)>>>;

// ============================================================================
// Deduplicator
// ============================================================================

/// Collapses concurrent identical requests into one.
pub struct Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pending: PendingMap<T>,
    next_id: AtomicU64,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty deduplicator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(FxHashMap::default())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with a request in flight.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.read().len()
    }

    /// Runs the request produced by `make`, or joins the one already in
    /// flight for `key`.
    ///
    /// `make` is only called when no request for `key` is pending.
    ///
    /// # Errors
    ///
    /// Returns the request's error; joined callers receive it as
    /// [`Error::Shared`] when it cannot be unwrapped.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let existing = self.pending.read().get(key).map(|(_, r)| r.clone());

        let request = match existing {
            Some(request) => {
                trace!(key, "Joining in-flight request");
                request
            }
            None => self.start(key, make),
        };

        request.await.map_err(Error::shared)
    }

    fn start<F, Fut>(&self, key: &str, make: F) -> SharedRequest<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut pending = self.pending.write();
        if let Some((_, request)) = pending.get(key) {
            return request.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let map = Arc::clone(&self.pending);
        let owned_key = key.to_string();
        let future = make();

        let request = async move {
            let result = future.await.map_err(Arc::new);
            let mut map = map.write();
            if map.get(&owned_key).is_some_and(|(current, _)| *current == id) {
                map.remove(&owned_key);
            }
            result
        }
        .boxed()
        .shared();

        pending.insert(key.to_string(), (id, request.clone()));
        request
    }

    /// Detaches every pending request so the next caller starts fresh.
    pub fn forget_all(&self) {
        let mut pending = self.pending.write();
        if !pending.is_empty() {
            trace!(count = pending.len(), "Detached in-flight requests");
        }
        pending.clear();
    }
}

impl<T> Default for Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
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

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use futures_util::future::join_all;

    #[tokio::test]
    async fn test_concurrent_identical_keys_share_one_request() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let calls = Arc::new(AtomicU32::new(0));

        let callers = (0..10).map(|_| {
            let calls = Arc::clone(&calls);
            dedup.run("list_tabs", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
            })
        });

        let results = join_all(callers).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(42))));
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_separately() {
        let dedup: Deduplicator<&'static str> = Deduplicator::new();
        let calls = Arc::new(AtomicU32::new(0));

        let a = {
            let calls = Arc::clone(&calls);
            dedup.run("a", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("a")
            })
        };
        let b = {
            let calls = Arc::clone(&calls);
            dedup.run("b", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("b")
            })
        };

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.expect("a"), "a");
        assert_eq!(b.expect("b"), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_reaches_every_caller() {
        let dedup: Deduplicator<u32> = Deduplicator::new();

        let callers = (0..3).map(|_| {
            dedup.run("query", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(Error::connection("refused"))
            })
        });

        for result in join_all(callers).await {
            let err = result.unwrap_err();
            assert!(err.is_connection_error());
        }
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_are_not_deduplicated() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            dedup
                .run("list_tabs", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst))
                })
                .await
                .expect("ok");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forgotten_request_does_not_evict_successor() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::new());
        let (release_old, old_gate) = tokio::sync::oneshot::channel::<()>();
        let (release_new, new_gate) = tokio::sync::oneshot::channel::<()>();

        let old = tokio::spawn({
            let dedup = Arc::clone(&dedup);
            async move {
                dedup
                    .run("list_tabs", || async move {
                        let _ = old_gate.await;
                        Ok(1)
                    })
                    .await
            }
        });
        while dedup.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        dedup.forget_all();
        assert_eq!(dedup.in_flight(), 0);

        let new = tokio::spawn({
            let dedup = Arc::clone(&dedup);
            async move {
                dedup
                    .run("list_tabs", || async move {
                        let _ = new_gate.await;
                        Ok(2)
                    })
                    .await
            }
        });
        while dedup.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let _ = release_old.send(());
        assert_eq!(old.await.expect("join").expect("old"), 1);
        assert_eq!(dedup.in_flight(), 1, "successor still pending");

        let _ = release_new.send(());
        assert_eq!(new.await.expect("join").expect("new"), 2);
        assert_eq!(dedup.in_flight(), 0);
    }
}
