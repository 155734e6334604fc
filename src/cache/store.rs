//! Cache Store Module
//!
//! The `TtlCache` façade: routes keys to shards through the hash ring and
//! composes per-key locking, bounds enforcement, single-flight loading,
//! metrics and the background cleanup scheduler.

use std::error::Error as StdError;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::bounds::{inline_size_weigher, BoundsEnforcer, Weigher};
use crate::cache::locks::KeyLockGuard;
use crate::cache::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::cache::ring::HashRing;
use crate::cache::shard::{Lookup, Shard};
use crate::cache::stampede::StampedeGuard;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{sweep_all, CleanupScheduler, SchedulerState, SweepReport};

// == Cache Inner ==
/// State shared between the façade, loader tasks and the cleanup task.
pub(crate) struct CacheInner<K, V> {
    ring: HashRing,
    pub(crate) shards: Box<[Shard<K, V>]>,
    pub(crate) stampede: StampedeGuard<K, V>,
    pub(crate) metrics: MetricsRecorder,
    default_ttl: Duration,
    weigher: Weigher<K, V>,
    runtime: Handle,
}

impl<K, V> CacheInner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(config: &CacheConfig, weigher: Weigher<K, V>, runtime: Handle) -> Self {
        let shards = (0..config.num_shards)
            .map(|index| {
                Shard::new(
                    index,
                    BoundsEnforcer::new(
                        config.entries_for_shard(index),
                        config.memory_for_shard(index),
                    ),
                )
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            ring: HashRing::new(config.num_shards, config.replicas_per_shard),
            shards,
            stampede: StampedeGuard::new(),
            metrics: MetricsRecorder::new(),
            default_ttl: config.default_ttl,
            weigher,
            runtime,
        }
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        &self.shards[self.ring.assign(key)]
    }

    fn note_lock(&self, guard: &KeyLockGuard<'_, K>) {
        if guard.was_contended() {
            self.metrics.record_contention();
        }
    }

    // == Get ==
    async fn get(&self, key: &K) -> Option<V> {
        let shard = self.shard_for(key);
        if let Some(value) = shard.read_optimistic(key) {
            self.metrics.record_hit();
            return Some(value);
        }

        let guard = shard.key_locks.acquire(key).await;
        self.note_lock(&guard);
        let lookup = shard.read_locked(key);
        drop(guard);

        match lookup {
            Lookup::Hit(value) => {
                self.metrics.record_hit();
                Some(value)
            }
            Lookup::Expired => {
                self.metrics.record_expired_on_read();
                self.metrics.record_miss();
                None
            }
            Lookup::Missing => {
                self.metrics.record_miss();
                None
            }
        }
    }

    // == Set ==
    async fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let shard = self.shard_for(&key);
        let ttl = ttl.unwrap_or(self.default_ttl);
        {
            let guard = shard.key_locks.acquire(&key).await;
            self.note_lock(&guard);
            shard.insert(key.clone(), value, ttl, &self.weigher);
        }
        self.metrics.record_set();

        if shard.over_bounds() {
            let _structure = shard.structure_lock.lock().await;
            let evicted = shard.evict_lru(&key);
            if evicted > 0 {
                self.metrics.record_evictions(evicted);
                debug!(shard = shard.index(), evicted, "Evicted least recently used entries");
            }
        }
    }

    // == Delete ==
    async fn delete(&self, key: &K) -> bool {
        let shard = self.shard_for(key);
        let guard = shard.key_locks.acquire(key).await;
        self.note_lock(&guard);
        let removed = shard.remove(key);
        drop(guard);

        if removed {
            self.metrics.record_delete();
        }
        removed
    }

    // == Clear ==
    async fn clear(&self) {
        // Ascending index order; sweeps and evictions take a single shard's
        // lock, so this can never deadlock against them
        let mut held = Vec::with_capacity(self.shards.len());
        for shard in self.shards.iter() {
            held.push(shard.structure_lock.lock().await);
        }
        for shard in self.shards.iter() {
            shard.clear();
        }
        drop(held);
    }

    fn size(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }
}

/// Clears a flight's registration when the load task ends, however it ends.
struct FlightCompletion<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<CacheInner<K, V>>,
    key: K,
    id: u64,
}

impl<K, V> Drop for FlightCompletion<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.stampede.complete(&self.key, self.id);
    }
}

/// Resolves with the result a load task sends, or `LoaderAborted` if the
/// task ends without sending one.
fn await_load<V>(receiver: oneshot::Receiver<Result<V>>) -> BoxFuture<'static, Result<V>>
where
    V: Send + 'static,
{
    async move {
        receiver.await.unwrap_or_else(|_| {
            Err(CacheError::LoaderAborted(
                "load task ended without a result".to_string(),
            ))
        })
    }
    .boxed()
}

/// Runs `loader` on its own task so no caller's cancellation can stop it.
/// A successful value is stored before the result is published and the
/// flight is cleared.
fn spawn_load<K, V, F, Fut, E>(
    inner: Arc<CacheInner<K, V>>,
    key: K,
    id: u64,
    ttl: Option<Duration>,
    loader: F,
    result_tx: oneshot::Sender<Result<V>>,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
{
    // Owned by the task future, so the flight is cleared even if the task
    // is dropped before its first poll
    let completion = FlightCompletion {
        inner: Arc::clone(&inner),
        key: key.clone(),
        id,
    };
    let runtime = inner.runtime.clone();

    runtime.spawn(async move {
        let _completion = completion;
        inner.metrics.record_load();

        let result = match loader().await {
            Ok(value) => {
                inner.set(key, value.clone(), ttl).await;
                Ok(value)
            }
            Err(err) => {
                inner.metrics.record_load_failure();
                let err = CacheError::loader(err);
                warn!(error = %err, "Loader failed; nothing cached");
                Err(err)
            }
        };
        // Every waiter may already have gone away
        let _ = result_tx.send(result);
    });
}

// == TTL Cache ==
/// Concurrent sharded cache with TTL expiry, LRU bounds and single-flight
/// loading.
///
/// Construct once inside a Tokio runtime and share by `Arc`. Call
/// [`stop`](Self::stop) before teardown to join the cleanup task; dropping
/// the cache also signals it to exit at its next wake-up.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<CacheInner<K, V>>,
    cleanup: CleanupScheduler,
    config: CacheConfig,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache and starts its cleanup task.
    ///
    /// Memory bounds are estimated from the inline size of keys and values;
    /// use [`with_weigher`](Self::with_weigher) for heap-owning types.
    ///
    /// # Errors
    /// `InvalidConfig` for rejected bounds, `RuntimeUnavailable` when called
    /// outside a Tokio runtime.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, inline_size_weigher())
    }

    /// Creates a cache that estimates entry sizes with `weigher`.
    pub fn with_weigher<W>(config: CacheConfig, weigher: W) -> Result<Self>
    where
        W: Fn(&K, &V) -> usize + Send + Sync + 'static,
    {
        Self::build(config, Arc::new(weigher))
    }

    fn build(config: CacheConfig, weigher: Weigher<K, V>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|err| CacheError::RuntimeUnavailable(err.to_string()))?;

        let inner = Arc::new(CacheInner::new(&config, weigher, runtime.clone()));
        let cleanup = CleanupScheduler::spawn(&runtime, Arc::clone(&inner), config.cleanup_interval);

        info!(
            shards = config.num_shards,
            replicas_per_shard = config.replicas_per_shard,
            max_entries_per_shard = config.max_entries_per_shard(),
            max_memory_per_shard = ?config.max_memory_per_shard(),
            default_ttl = ?config.default_ttl,
            "TTL cache started"
        );

        Ok(Self {
            inner,
            cleanup,
            config,
        })
    }

    // == Get ==
    /// Returns a clone of the live value for `key`.
    ///
    /// Hits are served by an optimistic read; misses and expired entries
    /// are re-checked under the key's lock, and an expired entry is removed.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry and its TTL.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - Optional TTL (uses the configured default if None)
    pub async fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        self.inner.set(key, value, ttl).await
    }

    // == Delete ==
    /// Removes `key`, returning whether it was present.
    pub async fn delete(&self, key: &K) -> bool {
        self.inner.delete(key).await
    }

    // == Clear ==
    /// Removes every entry. Metrics are kept.
    pub async fn clear(&self) {
        self.inner.clear().await
    }

    // == Get Or Load ==
    /// Returns the cached value, or loads, stores and returns it.
    ///
    /// Concurrent calls for the same absent key share one `loader` run and
    /// all receive its result or its error. The loader runs on its own task:
    /// cancelling any caller, including the one that started it, never
    /// cancels the load. Failed loads cache nothing.
    pub async fn get_or_load<F, Fut, E>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        self.get_or_load_with_ttl(key, None, loader).await
    }

    /// [`get_or_load`](Self::get_or_load) storing the loaded value with `ttl`.
    pub async fn get_or_load_with_ttl<F, Fut, E>(
        &self,
        key: K,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        if let Some(value) = self.inner.get(&key).await {
            return Ok(value);
        }

        let shard = self.inner.shard_for(&key);
        let (result_tx, result_rx) = oneshot::channel();
        let mut started = None;
        let flight = {
            let guard = shard.key_locks.acquire(&key).await;
            self.inner.note_lock(&guard);
            // Another caller may have stored the value while we waited
            if let Lookup::Hit(value) = shard.read_locked(&key) {
                return Ok(value);
            }
            self.inner.stampede.join_or_start(&key, |id| {
                started = Some(id);
                await_load(result_rx)
            })
        };

        // Spawned outside the registry lock: a task dropped at spawn clears
        // its own flight
        match started {
            Some(id) => spawn_load(Arc::clone(&self.inner), key, id, ttl, loader, result_tx),
            None => self.inner.metrics.record_coalesced_load(),
        }
        flight.into_future().await
    }

    // == Stop ==
    /// Stops the cleanup task and waits for any sweep in progress.
    ///
    /// Idempotent; once it returns no sweep is running or will start.
    pub async fn stop(&self) {
        self.cleanup.stop().await
    }

    // == Cleanup ==
    /// Sweeps every shard for expired entries now.
    pub async fn run_cleanup(&self) -> SweepReport {
        sweep_all(&self.inner).await
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.cleanup.state()
    }

    // == Inspection ==
    /// Number of stored entries, including expired ones not yet removed.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Expiry-aware presence check; records no metrics and no access.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.shard_for(key).contains_live(key)
    }

    /// Remaining lifetime of the live entry for `key`.
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        self.inner.shard_for(key).ttl_remaining(key)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(self.inner.size(), self.inner.stampede.len())
    }

    /// Index of the shard owning `key`.
    pub fn shard_index(&self, key: &K) -> usize {
        self.inner.ring.assign(key)
    }

    /// Entry count of every shard, by index.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.inner.shards.iter().map(|shard| shard.len()).collect()
    }

    pub fn max_entries_per_shard(&self) -> usize {
        self.config.max_entries_per_shard()
    }

    /// Per-key locks currently allocated across all shards.
    pub fn live_key_locks(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.key_locks.len())
            .sum()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn shard(&self, index: usize) -> &Shard<K, V> {
        &self.inner.shards[index]
    }
}
