//! Error types for the resilience layer.
//!
//! Only [`LockError`] and [`StorageError::Unrecoverable`] are meant to reach
//! callers. Cache errors are absorbed at the component boundary and turned
//! into absent/false/fallback results.

use std::time::Duration;

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type LockResult<T> = Result<T, LockError>;

/// Failures talking to the shared cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("shared cache unavailable: {0}")]
    Unavailable(String),

    #[error("shared cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected shared cache reply: {0}")]
    Protocol(String),

    #[error("cache payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            CacheError::Unavailable(err.to_string())
        } else if err.is_timeout() {
            CacheError::Timeout(Duration::ZERO)
        } else {
            CacheError::Protocol(err.to_string())
        }
    }
}

/// Caller-visible lock failures.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} acquiring lock on '{resource_id}' (held by {holder})")]
    AcquireTimeout {
        resource_id: String,
        waited: Duration,
        /// Best-effort description of the current holder, never empty.
        holder: String,
    },

    #[error("lock acquisition on '{resource_id}' was cancelled")]
    Cancelled { resource_id: String },
}

/// Storage adapter failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend '{backend}' unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blocking storage task failed: {0}")]
    Join(String),

    #[error("'{operation}' failed on both backends (primary: {primary}; secondary: {secondary})")]
    Unrecoverable {
        operation: String,
        primary: Box<StorageError>,
        secondary: Box<StorageError>,
    },
}

/// Invalid configuration values, surfaced at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
