//! Whole-layer behaviour while the shared cache comes and goes.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::cache::StaticConnector;
    use crate::cache_memory::MemoryCache;
    use crate::client::ResilienceClient;
    use crate::config::{ResilienceConfig, StorageSelector};
    use crate::gateway::{Availability, CacheGateway};
    use crate::infrastructure::StorageRecord;
    use crate::infrastructure_in_memory::InMemoryBackend;
    use crate::time::SystemClock;
    use crate::types::{HealthStatus, LockBackend, SessionBackend};

    fn config(dir: &TempDir) -> ResilienceConfig {
        ResilienceConfig {
            cache_url: Some("memory://shared".to_string()),
            cache_reconnect_interval_ms: 60_000,
            lock_dir: dir.path().join("locks"),
            lock_acquire_timeout_ms: 500,
            lock_retry_delay_ms: 10,
            file_store_dir: dir.path().join("data"),
            ..ResilienceConfig::default()
        }
    }

    fn client(dir: &TempDir) -> (ResilienceClient, Arc<MemoryCache>) {
        let config = config(dir);
        let cache = Arc::new(MemoryCache::new());
        let gateway = Arc::new(CacheGateway::new(
            Arc::new(StaticConnector::new(cache.clone())),
            config.gateway_options(),
        ));
        let client = ResilienceClient::new(
            config,
            gateway,
            Arc::new(InMemoryBackend::new()),
            Arc::new(SystemClock),
        );
        (client, cache)
    }

    #[tokio::test]
    async fn test_everything_uses_shared_cache_when_healthy() {
        let dir = TempDir::new().unwrap();
        let (client, _cache) = client(&dir);
        let cancel = CancellationToken::new();

        let mut guard = client.acquire_agent_lock("agent-1", &cancel).await.unwrap();
        assert_eq!(guard.backend(), LockBackend::Cache);
        guard.release().await;

        assert!(client.sessions().bind("s1", "agent-1", None).await);
        assert!(client.metadata().set_default("agent-1", &json!({"k": 1})).await);
        client.rate_limiter().record("agent-1", Duration::from_secs(60), "llm_call").await;
        assert_eq!(
            client.rate_limiter().get_count("agent-1", Duration::from_secs(60), "llm_call").await,
            1
        );

        let health = client.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.cache, Availability::Available);
        assert_eq!(health.sessions.backend, SessionBackend::Shared);
        assert_eq!(health.locks.backend_in_use, LockBackend::Cache);
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_every_service() {
        let dir = TempDir::new().unwrap();
        let (client, cache) = client(&dir);
        let cancel = CancellationToken::new();

        assert!(client.sessions().bind("s1", "agent-1", None).await);
        client.metadata().set_default("agent-1", &json!({"k": 1})).await;

        cache.set_offline(true);

        // Locks fall back to the filesystem.
        let mut guard = client.acquire_agent_lock("agent-1", &cancel).await.unwrap();
        assert_eq!(guard.backend(), LockBackend::File);
        assert!(dir.path().join("locks/agent-1.lock").exists());

        // Sessions bound before the outage are still served; new binds work.
        assert_eq!(client.sessions().get_agent_id("s1").await.as_deref(), Some("agent-1"));
        assert!(client.sessions().bind("s2", "agent-2", None).await);
        assert_eq!(client.sessions().get_agent_id("s2").await.as_deref(), Some("agent-2"));

        // Rate limiting fails open; metadata quietly misses.
        assert!(client.rate_limiter().check("agent-1", 0, Duration::from_secs(60), "llm_call").await);
        assert!(client.metadata().get("agent-1").await.is_none());

        // Storage is independent of the cache.
        client
            .storage()
            .put(StorageRecord::new("agents", "agent-1", json!({"ok": true}), 0))
            .await
            .unwrap();

        let health = client.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.cache, Availability::Unavailable);
        assert_eq!(health.sessions.backend, SessionBackend::Local);
        assert_eq!(health.locks.backend_in_use, LockBackend::File);
        assert_eq!(health.locks.active_lock_count, 1);

        guard.release().await;
    }

    #[tokio::test]
    async fn test_with_agent_lock_without_cache() {
        let dir = TempDir::new().unwrap();
        let config = ResilienceConfig {
            cache_url: None,
            ..config(&dir)
        };
        let client = ResilienceClient::new(
            config,
            Arc::new(CacheGateway::disconnected()),
            Arc::new(InMemoryBackend::new()),
            Arc::new(SystemClock),
        );
        let cancel = CancellationToken::new();

        let out = client
            .with_agent_lock("agent-1", &cancel, || async { "done" })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert!(!client.locks().is_locked("agent-1").await);

        // No cache was ever configured, so running without one is healthy.
        assert_eq!(client.health().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_from_config_with_file_storage() {
        let dir = TempDir::new().unwrap();
        let config = ResilienceConfig {
            cache_url: None,
            storage_backend: StorageSelector::File,
            ..config(&dir)
        };

        let client = ResilienceClient::from_config(config).unwrap();
        assert_eq!(client.storage().name(), "file");

        client
            .storage()
            .put(StorageRecord::new("agents", "a1", json!(1), 0))
            .await
            .unwrap();
        assert!(dir.path().join("data/agents/a1.json").exists());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_from_config_with_dual_storage() {
        let dir = TempDir::new().unwrap();
        let config = ResilienceConfig {
            cache_url: None,
            storage_backend: StorageSelector::Dual,
            sqlite_path: dir.path().join("bastion.db"),
            ..config(&dir)
        };

        let client = ResilienceClient::from_config(config).unwrap();
        assert_eq!(client.storage().name(), "dual");

        client
            .storage()
            .put(StorageRecord::new("agents", "a1", json!({"n": 1}), 0))
            .await
            .unwrap();
        assert!(dir.path().join("data/agents/a1.json").exists());

        let health = client.health().await;
        assert_eq!(health.storage.status, HealthStatus::Healthy);
        assert_eq!(health.storage.components.len(), 2);
    }
}
