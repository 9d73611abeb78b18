//! The shared-cache contract.
//!
//! Components never talk to a concrete cache client. They go through
//! [`CacheBackend`], which exposes exactly the primitives the resilience layer
//! relies on, so the real client can be swapped for [`MemoryCache`] in tests
//! or single-node deployments.
//!
//! [`MemoryCache`]: crate::cache_memory::MemoryCache

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Cheap liveness check.
    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Unconditional write, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Atomically creates `key` only if it does not exist. Returns whether
    /// the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Atomically deletes `key` only if its current value equals `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> CacheResult<bool>;

    /// All keys matching a glob pattern (`*` and `?`). Not for hot paths.
    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Refreshes the expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn zadd(&self, key: &str, member: &str, score: u64) -> CacheResult<()>;

    /// Removes sorted-set members whose score lies in `[min, max]`.
    async fn zremrange_by_score(&self, key: &str, min: u64, max: u64) -> CacheResult<usize>;

    async fn zcard(&self, key: &str) -> CacheResult<usize>;
}

/// Opens connections for the [`CacheGateway`](crate::gateway::CacheGateway).
#[async_trait]
pub trait CacheConnector: Send + Sync {
    /// Human readable endpoint, for logs.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> CacheResult<Arc<dyn CacheBackend>>;
}

/// Hands out the same pre-built backend on every connect.
pub struct StaticConnector {
    backend: Arc<dyn CacheBackend>,
}

impl StaticConnector {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl CacheConnector for StaticConnector {
    fn endpoint(&self) -> String {
        "static".to_string()
    }

    async fn connect(&self) -> CacheResult<Arc<dyn CacheBackend>> {
        Ok(Arc::clone(&self.backend))
    }
}
