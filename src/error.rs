//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A loader error shared by every caller waiting on the same load.
pub type SharedLoaderError = Arc<dyn StdError + Send + Sync>;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Misses and expiry are never errors; only construction and `get_or_load`
/// can fail.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller-supplied loader returned an error
    #[error("Loader failed: {0}")]
    Loader(SharedLoaderError),

    /// The loader task ended without producing a result (panic or runtime shutdown)
    #[error("Loader aborted: {0}")]
    LoaderAborted(String),

    /// The cache was constructed outside of a Tokio runtime
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

impl CacheError {
    /// Wraps a loader error so it can be handed to every waiter.
    pub fn loader<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        CacheError::Loader(Arc::from(err.into()))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_error_message_appears_once() {
        let err = CacheError::loader("backend unavailable");

        assert_eq!(err.to_string(), "Loader failed: backend unavailable");
        // The message is already in the display, so no source repeats it
        assert!(err.source().is_none());
    }

    #[test]
    fn test_cloned_loader_error_shares_allocation() {
        let err = CacheError::loader(std::io::Error::other("disk gone"));
        let cloned = err.clone();

        match (err, cloned) {
            (CacheError::Loader(a), CacheError::Loader(b)) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("unexpected variants: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_display() {
        let err = CacheError::InvalidConfig("num_shards must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: num_shards must be at least 1"
        );
    }
}
