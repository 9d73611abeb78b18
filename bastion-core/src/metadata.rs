//! Cache-aside store for opportunistic agent metadata.
//!
//! There is no local fallback: when the shared cache is unavailable every
//! operation quietly reports a miss and callers go to the authoritative
//! store themselves.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::gateway::CacheGateway;
use crate::types::KeySpace;

pub struct MetadataCache {
    gateway: Arc<CacheGateway>,
    default_ttl: Duration,
}

impl MetadataCache {
    pub fn new(gateway: Arc<CacheGateway>, default_ttl: Duration) -> Self {
        Self {
            gateway,
            default_ttl,
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<Value> {
        let cache = self.gateway.get().await?;
        let key = KeySpace::AgentMeta.key(agent_id);
        let raw = match cache.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::debug!(agent_id, error = %e, "Metadata read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(agent_id, error = %e, "Dropping corrupt cached metadata");
                let _ = cache.delete(&key).await;
                None
            }
        }
    }

    pub async fn set(&self, agent_id: &str, payload: &Value, ttl: Duration) -> bool {
        let Some(cache) = self.gateway.get().await else {
            return false;
        };
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match cache.set(&KeySpace::AgentMeta.key(agent_id), &raw, Some(ttl)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(agent_id, error = %e, "Metadata write failed");
                false
            }
        }
    }

    /// `set` with the configured TTL.
    pub async fn set_default(&self, agent_id: &str, payload: &Value) -> bool {
        self.set(agent_id, payload, self.default_ttl).await
    }

    /// Call after every write to the source of truth for `agent_id`.
    pub async fn invalidate(&self, agent_id: &str) -> bool {
        let Some(cache) = self.gateway.get().await else {
            return false;
        };
        cache
            .delete(&KeySpace::AgentMeta.key(agent_id))
            .await
            .unwrap_or(false)
    }

    /// Drops every cached entry. Enumerates keys by pattern, so keep it out
    /// of hot paths.
    pub async fn invalidate_all(&self) -> usize {
        let Some(cache) = self.gateway.get().await else {
            return 0;
        };
        let keys = match cache.scan(&KeySpace::AgentMeta.pattern()).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Metadata scan failed");
                return 0;
            }
        };
        let mut removed = 0;
        for key in keys {
            if cache.delete(&key).await.unwrap_or(false) {
                removed += 1;
            }
        }
        tracing::info!(removed, "Invalidated cached agent metadata");
        removed
    }
}
