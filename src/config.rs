//! Configuration Module
//!
//! Handles loading, validating and deriving the cache engine's configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default virtual nodes placed on the ring for every shard.
pub const DEFAULT_REPLICAS_PER_SHARD: usize = 100;

/// Cache engine configuration parameters.
///
/// All values are read once at construction. Changing `num_shards` requires
/// building a new cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// TTL applied to entries stored without an explicit TTL
    pub default_ttl: Duration,
    /// Interval between background expiry sweeps
    pub cleanup_interval: Duration,
    /// Number of independently locked shards
    pub num_shards: usize,
    /// Virtual nodes per shard on the consistent-hash ring
    pub replicas_per_shard: usize,
    /// Entry bound for the whole cache, split evenly across shards
    pub max_entries_total: usize,
    /// Optional estimated memory bound for the whole cache, split evenly across shards
    pub max_memory_bytes: Option<usize>,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TTL_SECONDS` - Default TTL in (fractional) seconds (default: 300)
    /// - `CLEANUP_INTERVAL_SECONDS` - Sweep frequency in (fractional) seconds (default: 1)
    /// - `NUM_SHARDS` - Shard count (default: 16)
    /// - `REPLICAS_PER_SHARD` - Virtual nodes per shard (default: 100)
    /// - `MAX_ENTRIES_TOTAL` - Entry bound across all shards (default: 10000)
    /// - `MAX_MEMORY_BYTES` - Estimated memory bound (default: unbounded)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: env_seconds("TTL_SECONDS").unwrap_or(defaults.default_ttl),
            cleanup_interval: env_seconds("CLEANUP_INTERVAL_SECONDS")
                .unwrap_or(defaults.cleanup_interval),
            num_shards: env_parse("NUM_SHARDS").unwrap_or(defaults.num_shards),
            replicas_per_shard: env_parse("REPLICAS_PER_SHARD")
                .unwrap_or(defaults.replicas_per_shard),
            max_entries_total: env_parse("MAX_ENTRIES_TOTAL")
                .unwrap_or(defaults.max_entries_total),
            max_memory_bytes: env_parse("MAX_MEMORY_BYTES"),
        }
    }

    // == Validate ==
    /// Rejects bounds and intervals the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(invalid("num_shards must be at least 1"));
        }
        if self.replicas_per_shard == 0 {
            return Err(invalid("replicas_per_shard must be at least 1"));
        }
        if self.max_entries_total == 0 {
            return Err(invalid("max_entries_total must be at least 1"));
        }
        if self.max_memory_bytes == Some(0) {
            return Err(invalid("max_memory_bytes must be at least 1 when set"));
        }
        // Every shard keeps at least one entry, so a smaller total cannot hold
        if self.max_entries_total < self.num_shards {
            return Err(invalid("max_entries_total must be at least num_shards"));
        }
        if self.max_memory_bytes.is_some_and(|bytes| bytes < self.num_shards) {
            return Err(invalid("max_memory_bytes must be at least num_shards when set"));
        }
        if self.default_ttl.is_zero() {
            return Err(invalid("default ttl must be greater than zero"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(invalid("cleanup interval must be greater than zero"));
        }
        Ok(())
    }

    /// Largest entry bound enforced on any shard.
    pub fn max_entries_per_shard(&self) -> usize {
        self.max_entries_total.div_ceil(self.num_shards.max(1))
    }

    /// Largest estimated memory bound enforced on any shard, if any.
    pub fn max_memory_per_shard(&self) -> Option<usize> {
        self.max_memory_bytes
            .map(|bytes| bytes.div_ceil(self.num_shards.max(1)))
    }

    /// Entry bound of shard `index`. The shares sum to `max_entries_total`.
    pub fn entries_for_shard(&self, index: usize) -> usize {
        split_evenly(self.max_entries_total, self.num_shards, index)
    }

    /// Memory bound of shard `index`. The shares sum to `max_memory_bytes`.
    pub fn memory_for_shard(&self, index: usize) -> Option<usize> {
        self.max_memory_bytes
            .map(|bytes| split_evenly(bytes, self.num_shards, index))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(1),
            num_shards: 16,
            replicas_per_shard: DEFAULT_REPLICAS_PER_SHARD,
            max_entries_total: 10_000,
            max_memory_bytes: None,
        }
    }
}

fn invalid(reason: &str) -> CacheError {
    CacheError::InvalidConfig(reason.to_string())
}

/// Share of `total` for part `index` of `parts`; the first `total % parts`
/// parts take one extra.
fn split_evenly(total: usize, parts: usize, index: usize) -> usize {
    let parts = parts.max(1);
    total / parts + usize::from(index < total % parts)
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_seconds(name: &str) -> Option<Duration> {
    env_parse::<f64>(name)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
