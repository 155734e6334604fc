//! TTL Cleanup Task
//!
//! Background scheduler that periodically sweeps expired entries out of
//! every shard, in parallel, and can be stopped gracefully.

use std::any::Any;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::cache::CacheInner;

/// Lifecycle of the cleanup scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Stopped,
    Running,
    /// Stop requested; waiting for the current sweep to finish
    Stopping,
}

/// Outcome of one sweep over all shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired entries removed
    pub removed: usize,
    /// Shards whose sweep failed, ascending
    pub failed_shards: Vec<usize>,
    pub duration: Duration,
}

// == Cleanup Scheduler ==
/// Owns the background cleanup task.
pub struct CleanupScheduler {
    state: Arc<Mutex<SchedulerState>>,
    shutdown: watch::Sender<bool>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    /// Spawns a task that sweeps `inner` every `interval` until stopped.
    ///
    /// # Arguments
    /// * `runtime` - Runtime the task runs on
    /// * `inner` - Shared cache state to sweep
    /// * `interval` - Time between sweeps
    ///
    /// # Returns
    /// A scheduler in the `Running` state
    pub(crate) fn spawn<K, V>(
        runtime: &Handle,
        inner: Arc<CacheInner<K, V>>,
        interval: Duration,
    ) -> Self
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(SchedulerState::Running));

        let handle = runtime.spawn(async move {
            info!(interval = ?interval, "Starting TTL cleanup task");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        // A closed channel means the cache was dropped
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        sweep_all(&inner).await;
                    }
                }
            }

            debug!("TTL cleanup task exiting");
        });

        Self {
            state,
            shutdown,
            handle: AsyncMutex::new(Some(handle)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    // == Stop ==
    /// Signals the task to exit and waits for it, including any sweep in
    /// progress. Concurrent and repeated calls all return once it is done.
    pub async fn stop(&self) {
        let mut handle = self.handle.lock().await;
        {
            let mut state = self.state.lock();
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopping;
        }

        // Fails only if the task already exited
        let _ = self.shutdown.send(true);
        if let Some(task) = handle.take() {
            if let Err(err) = task.await {
                error!(error = %err, "TTL cleanup task ended abnormally");
            }
        }

        *self.state.lock() = SchedulerState::Stopped;
        info!("TTL cleanup task stopped");
    }
}

// == Sweep ==
/// Sweeps every shard concurrently, one task per shard.
///
/// A shard whose sweep panics is logged and reported; the others are
/// unaffected.
pub(crate) async fn sweep_all<K, V>(inner: &Arc<CacheInner<K, V>>) -> SweepReport
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let started = std::time::Instant::now();
    let mut tasks = JoinSet::new();
    for index in 0..inner.shards.len() {
        let inner = Arc::clone(inner);
        tasks.spawn(async move {
            let outcome = AssertUnwindSafe(sweep_shard(&inner, index))
                .catch_unwind()
                .await;
            (index, outcome)
        });
    }

    let mut removed = 0;
    let mut failed_shards = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(count))) => removed += count,
            Ok((index, Err(panic))) => {
                error!(
                    shard = index,
                    entries = inner.shards[index].len(),
                    error = %panic_message(panic.as_ref()),
                    "Shard sweep failed"
                );
                inner.metrics.record_sweep_failure();
                failed_shards.push(index);
            }
            Err(err) => {
                error!(error = %err, "Shard sweep task failed");
                inner.metrics.record_sweep_failure();
            }
        }
    }
    failed_shards.sort_unstable();

    let duration = started.elapsed();
    inner.metrics.record_sweep(removed, duration);

    if removed > 0 {
        info!(removed, duration = ?duration, "TTL cleanup: removed expired entries");
    } else {
        debug!("TTL cleanup: no expired entries found");
    }

    SweepReport {
        removed,
        failed_shards,
        duration,
    }
}

async fn sweep_shard<K, V>(inner: &CacheInner<K, V>, index: usize) -> usize
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let shard = &inner.shards[index];
    let _structure = shard.structure_lock.lock().await;
    shard.remove_expired(tokio::time::Instant::now())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
