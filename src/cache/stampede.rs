//! Stampede Guard Module
//!
//! Single-flight bookkeeping: at most one load per key is in flight, and
//! every concurrent caller for that key awaits the same result.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::Result;

/// A load result that any number of callers can await.
pub type LoadFuture<V> = Shared<BoxFuture<'static, Result<V>>>;

struct InFlight<V> {
    id: u64,
    future: LoadFuture<V>,
}

/// How a caller takes part in a load.
pub enum Flight<V> {
    /// This caller started the load
    Leader(LoadFuture<V>),
    /// A load was already running; this caller joined it
    Follower(LoadFuture<V>),
}

impl<V> Flight<V> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Flight::Leader(_))
    }

    pub fn into_future(self) -> LoadFuture<V> {
        match self {
            Flight::Leader(future) | Flight::Follower(future) => future,
        }
    }
}

// == Stampede Guard ==
/// Registry of in-flight loads, keyed by cache key.
pub struct StampedeGuard<K, V> {
    in_flight: Mutex<AHashMap<K, InFlight<V>>>,
    next_id: AtomicU64,
}

impl<K, V> StampedeGuard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // == Join Or Start ==
    /// Joins the load in flight for `key`, or starts one.
    ///
    /// `start` receives the id of the new flight and must return the load
    /// future. It runs while the registry is locked, so it must neither
    /// block nor call back into this guard. The flight stays registered until
    /// [`complete`](Self::complete) is called with the same id.
    pub fn join_or_start<F>(&self, key: &K, start: F) -> Flight<V>
    where
        F: FnOnce(u64) -> BoxFuture<'static, Result<V>>,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            return Flight::Follower(existing.future.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let future = start(id).shared();
        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                future: future.clone(),
            },
        );
        Flight::Leader(future)
    }

    // == Complete ==
    /// Removes the flight for `key` if it is still the one started as `id`.
    pub fn complete(&self, key: &K, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|flight| flight.id == id) {
            in_flight.remove(key);
        }
    }

    /// Number of loads currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

impl<K, V> Default for StampedeGuard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    fn ready(value: u32) -> BoxFuture<'static, Result<u32>> {
        async move { Ok(value) }.boxed()
    }

    #[tokio::test]
    async fn test_first_caller_leads_and_others_follow() {
        let guard: StampedeGuard<String, u32> = StampedeGuard::new();
        let key = "k".to_string();

        let leader = guard.join_or_start(&key, |_| ready(7));
        let follower = guard.join_or_start(&key, |_| panic!("second load started"));

        assert!(leader.is_leader());
        assert!(!follower.is_leader());
        assert_eq!(guard.len(), 1);

        assert_eq!(leader.into_future().await.unwrap(), 7);
        assert_eq!(follower.into_future().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_complete_only_removes_matching_flight() {
        let guard: StampedeGuard<&str, u32> = StampedeGuard::new();

        let mut first_id = 0;
        let _ = guard.join_or_start(&"k", |id| {
            first_id = id;
            ready(1)
        });
        guard.complete(&"k", first_id);
        assert!(guard.is_empty());

        let mut second_id = 0;
        let _ = guard.join_or_start(&"k", |id| {
            second_id = id;
            ready(2)
        });
        // A stale completion must not drop the newer flight
        guard.complete(&"k", first_id);
        assert_eq!(guard.len(), 1);

        guard.complete(&"k", second_id);
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn test_error_is_shared_by_all_waiters() {
        let guard: StampedeGuard<u8, u32> = StampedeGuard::new();
        let leader = guard.join_or_start(&1, |_| {
            async { Err(CacheError::loader("boom")) }.boxed()
        });
        let follower = guard.join_or_start(&1, |_| ready(0));

        let (a, b) = tokio::join!(leader.into_future(), follower.into_future());
        match (a, b) {
            (Err(CacheError::Loader(a)), Err(CacheError::Loader(b))) => {
                assert!(std::sync::Arc::ptr_eq(&a, &b))
            }
            other => panic!("unexpected results: {:?}", other),
        }
    }
}
