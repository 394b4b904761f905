//! 请求合并模块：同一键的并发请求只触发一次上游调用。
//!
//! # In-Flight Request Deduplication
//!
//! A process-wide map from normalized key to the pending result of the one
//! upstream call currently running for that key. Concurrent callers join the
//! existing [`Shared`] future instead of issuing a second call; all of them
//! observe the identical outcome, success or failure.
//!
//! The map lives for the process lifetime and is never shared across
//! processes. It is owned by the service and injected where needed, not held
//! in a global.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::cache::QueryKey;

/// Handle to a single in-progress call, awaitable by any number of callers.
pub type SharedCall<T> = Shared<BoxFuture<'static, T>>;

/// Key → pending-call map with atomic join-or-start semantics.
///
/// The output type must be `Clone` so every waiter can take its own copy of
/// the one settled result.
pub struct InflightMap<T: Clone + Send + 'static> {
    inner: Mutex<HashMap<String, SharedCall<T>>>,
}

impl<T: Clone + Send + 'static> Default for InflightMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> InflightMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight call for `key`, or start one.
    ///
    /// The check and the insert happen under a single lock acquisition with no
    /// await point in between, so two callers can never both observe "no
    /// entry" and both start a call. `start` only constructs the future; it is
    /// first polled by whoever awaits the returned handle.
    ///
    /// Returns the shared handle and whether this caller started the call.
    pub fn join_or_start<F>(&self, key: &QueryKey, start: F) -> (SharedCall<T>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut map = self.inner.lock().expect("inflight lock poisoned");
        if let Some(existing) = map.get(key.as_str()) {
            return (existing.clone(), false);
        }
        let call = start().shared();
        map.insert(key.as_str().to_string(), call.clone());
        (call, true)
    }

    /// Release `key` after `call` has settled.
    ///
    /// Removal is guarded by pointer identity: if a fresh call has already
    /// been started for the same key (a retry after failure), a slow waiter
    /// finishing up the old one must not evict it. Safe to invoke from every
    /// waiter; only the first matching invocation removes the entry.
    pub fn complete(&self, key: &QueryKey, call: &SharedCall<T>) {
        let mut map = self.inner.lock().expect("inflight lock poisoned");
        if let Some(current) = map.get(key.as_str()) {
            if current.ptr_eq(call) {
                map.remove(key.as_str());
            }
        }
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("inflight lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn key(s: &str) -> QueryKey {
        QueryKey::from(s)
    }

    #[tokio::test]
    async fn test_concurrent_joiners_share_one_call() {
        let map: InflightMap<u32> = InflightMap::new();
        let calls = Arc::new(AtomicU32::new(0));

        let make = |calls: Arc<AtomicU32>| {
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    7u32
                }
                .boxed()
            }
        };

        let (first, started_first) = map.join_or_start(&key("k"), make(calls.clone()));
        let (second, started_second) = map.join_or_start(&key("k"), make(calls.clone()));
        assert!(started_first);
        assert!(!started_second);
        assert!(first.ptr_eq(&second));

        let (a, b) = tokio::join!(first.clone(), second);
        assert_eq!(a, 7);
        assert_eq!(b, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complete_releases_key() {
        let map: InflightMap<u32> = InflightMap::new();
        let (call, _) = map.join_or_start(&key("k"), || async { 1u32 }.boxed());
        assert_eq!(map.len(), 1);
        call.clone().await;
        map.complete(&key("k"), &call);
        assert!(map.is_empty());

        let (_, started) = map.join_or_start(&key("k"), || async { 2u32 }.boxed());
        assert!(started, "released key must admit a fresh call");
    }

    #[tokio::test]
    async fn test_stale_complete_leaves_fresh_call() {
        let map: InflightMap<u32> = InflightMap::new();
        let (old, _) = map.join_or_start(&key("k"), || async { 1u32 }.boxed());
        map.complete(&key("k"), &old);

        let (fresh, started) = map.join_or_start(&key("k"), || async { 2u32 }.boxed());
        assert!(started);

        // A slow waiter of the old call must not evict the fresh one.
        map.complete(&key("k"), &old);
        assert_eq!(map.len(), 1);

        let (joined, started_again) = map.join_or_start(&key("k"), || async { 3u32 }.boxed());
        assert!(!started_again);
        assert!(joined.ptr_eq(&fresh));
    }

    #[test]
    fn test_joiner_is_pending_until_the_call_settles() {
        let map: InflightMap<u32> = InflightMap::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let (call, _) =
            map.join_or_start(&key("k"), || async move { rx.await.unwrap_or(0) }.boxed());

        let mut waiter = tokio_test::task::spawn(call.clone());
        tokio_test::assert_pending!(waiter.poll());

        tx.send(9).expect("receiver alive");
        tokio_test::assert_ready_eq!(waiter.poll(), 9);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let map: InflightMap<u32> = InflightMap::new();
        let (a, started_a) = map.join_or_start(&key("a"), || async { 1u32 }.boxed());
        let (b, started_b) = map.join_or_start(&key("b"), || async { 2u32 }.boxed());
        assert!(started_a);
        assert!(started_b);
        assert!(!a.ptr_eq(&b));
        assert_eq!(map.len(), 2);
    }
}
