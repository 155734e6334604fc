//! Sharded TTL Cache - demo workload
//!
//! Runs concurrent `get_or_load` workers against a cache backed by a slow
//! simulated loader and logs metrics snapshots as JSON until shut down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sharded_ttl_cache::{CacheConfig, TtlCache};

/// Workload settings read from the environment.
#[derive(Debug, Clone)]
struct Workload {
    workers: usize,
    keyspace: u64,
    load_delay: Duration,
    report_interval: Duration,
}

impl Workload {
    fn from_env() -> anyhow::Result<Self> {
        let workload = Self {
            workers: env_or("WORKERS", 8)?,
            keyspace: env_or("KEYSPACE", 1_000)?,
            load_delay: Duration::from_millis(env_or("LOAD_DELAY_MS", 20)?),
            report_interval: Duration::from_secs(env_or("REPORT_INTERVAL_SECONDS", 5)?),
        };
        workload.validate()?;
        Ok(workload)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.keyspace == 0 {
            bail!("KEYSPACE must be at least 1");
        }
        if self.report_interval.is_zero() {
            bail!("REPORT_INTERVAL_SECONDS must be at least 1");
        }
        Ok(())
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Main entry point for the cache demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load cache and workload configuration from environment variables
/// 3. Create the cache, which starts its cleanup task
/// 4. Start workload workers and the metrics reporter
/// 5. On SIGINT/SIGTERM stop the workers, then stop the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sharded_ttl_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    let workload = Workload::from_env()?;
    info!(?config, ?workload, "Configuration loaded");

    let cache: Arc<TtlCache<u64, String>> = Arc::new(
        TtlCache::with_weigher(config, |_: &u64, value: &String| {
            std::mem::size_of::<u64>() + value.capacity()
        })
        .context("failed to create cache")?,
    );

    let mut workers = JoinSet::new();
    for worker in 0..workload.workers {
        workers.spawn(run_worker(Arc::clone(&cache), workload.clone(), worker));
    }
    info!(workers = workload.workers, "Workload started");

    let mut report = tokio::time::interval(workload.report_interval);
    report.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => log_metrics(&cache)?,
        }
    }

    workers.shutdown().await;
    cache.stop().await;
    log_metrics(&cache)?;

    info!("Shutdown complete");
    Ok(())
}

async fn run_worker(cache: Arc<TtlCache<u64, String>>, workload: Workload, worker: usize) {
    let mut seq: u64 = worker as u64;
    loop {
        // Stride through the keyspace so workers overlap on hot keys
        seq = seq.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let key = (seq >> 33) % workload.keyspace;
        let delay = workload.load_delay;

        let loaded = cache
            .get_or_load(key, move || async move {
                tokio::time::sleep(delay).await;
                if key % 101 == 0 {
                    return Err(format!("backend has no record for key {}", key));
                }
                Ok(format!("value-{}", key))
            })
            .await;

        if let Err(err) = loaded {
            warn!(worker, key, error = %err, "Load failed");
        }
        if key % 10 == 0 {
            cache.delete(&key).await;
        }
        tokio::task::yield_now().await;
    }
}

fn log_metrics(cache: &TtlCache<u64, String>) -> anyhow::Result<()> {
    let snapshot = cache.metrics();
    let json = serde_json::to_string(&snapshot).context("failed to serialize metrics")?;
    info!(hit_rate = snapshot.hit_rate(), metrics = %json, "Cache metrics");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
