//! High-level entry point that wires every service from one configuration.
//! The application constructs one `ResilienceClient` at start-up and shares
//! it (behind an `Arc`) with the components that need locking, storage or
//! caching.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheConnector;
use crate::config::{ResilienceConfig, StorageSelector};
use crate::dual_write::DualWriteBackend;
use crate::error::{LockResult, StorageResult};
use crate::gateway::{Availability, CacheGateway};
use crate::infrastructure::StorageBackend;
use crate::infrastructure_file::FileBackend;
use crate::infrastructure_in_memory::InMemoryBackend;
use crate::lock::{DistributedLock, LockGuard};
use crate::metadata::MetadataCache;
use crate::rate_limit::RateLimiter;
use crate::session::SessionCache;
use crate::time::{Clock, SystemClock};
use crate::types::{HealthReport, HealthStatus, LockHealth, SessionBackend, SessionHealth};

/// Aggregated health of the whole layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerHealth {
    pub status: HealthStatus,
    pub cache: Availability,
    pub locks: LockHealth,
    pub sessions: SessionHealth,
    pub storage: HealthReport,
}

pub struct ResilienceClient {
    config: ResilienceConfig,
    gateway: Arc<CacheGateway>,
    locks: DistributedLock,
    sessions: SessionCache,
    rate_limiter: RateLimiter,
    metadata: MetadataCache,
    storage: Arc<dyn StorageBackend>,
}

impl ResilienceClient {
    /// Builds every service from `config`, opening the configured storage
    /// backend and (lazily) the shared cache.
    pub fn from_config(config: ResilienceConfig) -> StorageResult<Self> {
        let gateway = Arc::new(build_gateway(&config));
        let storage = build_storage(&config)?;
        Ok(Self::new(config, gateway, storage, Arc::new(SystemClock)))
    }

    /// Wires pre-built parts together. Useful when embedding or testing.
    pub fn new(
        config: ResilienceConfig,
        gateway: Arc<CacheGateway>,
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = DistributedLock::new(
            Arc::clone(&gateway),
            config.lock_options(),
            Arc::clone(&clock),
        );
        let sessions =
            SessionCache::new(Arc::clone(&gateway), Arc::clone(&clock), config.session_ttl());
        let rate_limiter = RateLimiter::new(
            Arc::clone(&gateway),
            Arc::clone(&clock),
            config.rate_limit_policy,
            config.rate_limit_margin(),
        );
        let metadata = MetadataCache::new(Arc::clone(&gateway), config.metadata_ttl());

        Self {
            config,
            gateway,
            locks,
            sessions,
            rate_limiter,
            metadata,
            storage,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<CacheGateway> {
        &self.gateway
    }

    pub fn locks(&self) -> &DistributedLock {
        &self.locks
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Exclusive claim on one agent's state, across every process.
    pub async fn acquire_agent_lock(
        &self,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> LockResult<LockGuard> {
        self.locks.acquire_default(agent_id, cancel).await
    }

    /// Runs `work` under the agent's lock; the lock is released on every
    /// exit path, including cancellation of the returned future.
    pub async fn with_agent_lock<F, Fut, T>(
        &self,
        agent_id: &str,
        cancel: &CancellationToken,
        work: F,
    ) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.locks.with_lock(agent_id, cancel, work).await
    }

    pub async fn health(&self) -> LayerHealth {
        let locks = self.locks.health_check().await;
        let sessions = self.sessions.health_check().await;
        let storage = self.storage.health_check().await;
        let cache = self.gateway.availability().await;

        // A lost cache only degrades the layer; storage decides hard failure.
        let status = match storage.status {
            HealthStatus::Unhealthy => HealthStatus::Unhealthy,
            HealthStatus::Degraded => HealthStatus::Degraded,
            HealthStatus::Healthy => {
                let cache_expected = self.config.cache_url.is_some() && !self.gateway.is_disabled();
                if cache_expected && sessions.backend == SessionBackend::Local {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
        };

        LayerHealth {
            status,
            cache,
            locks,
            sessions,
            storage,
        }
    }
}

// ─── Backend Selection ──────────────────────────────────────────────────────

/// The cache gateway described by `config`. Without a URL (or without a
/// compiled-in client) the gateway never connects.
pub fn build_gateway(config: &ResilienceConfig) -> CacheGateway {
    match connector_for(config) {
        Some(connector) => CacheGateway::new(connector, config.gateway_options()),
        None => CacheGateway::disconnected(),
    }
}

#[cfg(feature = "redis")]
fn connector_for(config: &ResilienceConfig) -> Option<Arc<dyn CacheConnector>> {
    let url = config.cache_url.as_ref()?;
    Some(Arc::new(crate::cache_redis::RedisConnector::new(
        url.clone(),
        config.gateway_options().op_timeout,
    )))
}

#[cfg(not(feature = "redis"))]
fn connector_for(config: &ResilienceConfig) -> Option<Arc<dyn CacheConnector>> {
    if config.cache_url.is_some() {
        tracing::warn!(
            "A cache URL is configured but the `redis` feature is not enabled; \
             running without a shared cache"
        );
    }
    None
}

/// Opens the storage backend selected in `config`.
pub fn build_storage(config: &ResilienceConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.storage_backend {
        StorageSelector::Memory => Arc::new(InMemoryBackend::new()),
        StorageSelector::Sqlite => open_sqlite(config)?,
        StorageSelector::File => Arc::new(FileBackend::new(&config.file_store_dir)),
        StorageSelector::Dual => Arc::new(DualWriteBackend::new(
            open_sqlite(config)?,
            Arc::new(FileBackend::new(&config.file_store_dir)),
            config.read_primary,
        )),
    };
    tracing::info!(backend = backend.name(), "Storage backend ready");
    Ok(backend)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &ResilienceConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    Ok(Arc::new(crate::infrastructure_sqlite::SqliteBackend::open(
        &config.sqlite_path,
    )?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &ResilienceConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    Err(crate::error::StorageError::Unavailable {
        backend: "sqlite".to_string(),
        reason: "built without the `sqlite` feature".to_string(),
    })
}
