//! Session-to-agent binding cache.
//!
//! Bindings are written to the shared cache when it is reachable and always to
//! an in-process mirror, so a cache outage in the middle of a session does not
//! strand bindings that were made before it. Reads go to the shared cache
//! first and then to the mirror. Mirror entries age out on the same TTL as
//! the shared copy and are dropped lazily when found expired.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::cache::CacheBackend;
use crate::gateway::CacheGateway;
use crate::time::Clock;
use crate::types::{KeySpace, SessionBackend, SessionBinding, SessionHealth};

pub struct SessionCache {
    gateway: Arc<CacheGateway>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    mirror: RwLock<HashMap<String, SessionBinding>>,
}

impl SessionCache {
    pub fn new(gateway: Arc<CacheGateway>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            gateway,
            clock,
            ttl,
            mirror: RwLock::new(HashMap::new()),
        }
    }

    /// Pins `session_id` to `agent_id`.
    ///
    /// Binding the same pair again increments `bind_count`; binding the
    /// session to a different agent replaces the binding. Returns `false`
    /// only for empty identifiers.
    pub async fn bind(
        &self,
        session_id: &str,
        agent_id: &str,
        credential_hash: Option<String>,
    ) -> bool {
        if session_id.is_empty() || agent_id.is_empty() {
            return false;
        }

        let now = self.clock.now_ms();
        let binding = match self.get(session_id).await {
            Some(existing) => existing.rebind(agent_id, credential_hash, now),
            None => SessionBinding::new(session_id, agent_id, credential_hash, now),
        };

        if let Some(cache) = self.gateway.get().await {
            self.store_shared(cache.as_ref(), &binding).await;
        }
        self.mirror
            .write()
            .await
            .insert(session_id.to_string(), binding);
        true
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionBinding> {
        if let Some(cache) = self.gateway.get().await {
            if let Some(binding) = self.load_shared(cache.as_ref(), session_id).await {
                self.mirror
                    .write()
                    .await
                    .insert(session_id.to_string(), binding.clone());
                return Some(binding);
            }
        }

        let now = self.clock.now_ms();
        let mut mirror = self.mirror.write().await;
        let binding = mirror.get(session_id)?.clone();
        if self.is_live(&binding, now) {
            return Some(binding);
        }
        tracing::debug!(session_id, "Dropping expired session from local mirror");
        mirror.remove(session_id);
        None
    }

    pub async fn get_agent_id(&self, session_id: &str) -> Option<String> {
        self.get(session_id).await.map(|b| b.agent_id)
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        self.get(session_id).await.is_some()
    }

    /// Removes the binding everywhere. Returns whether anything was removed.
    pub async fn unbind(&self, session_id: &str) -> bool {
        let mut removed = false;
        if let Some(cache) = self.gateway.get().await {
            match cache.delete(&KeySpace::Session.key(session_id)).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => tracing::warn!(session_id, error = %e, "Could not unbind session in shared cache"),
            }
        }
        removed |= self.mirror.write().await.remove(session_id).is_some();
        removed
    }

    /// Reverse lookup by agent.
    ///
    /// O(n) over every bound session: scans the shared cache and then the
    /// mirror. Meant for rare operator-driven lookups, not hot paths.
    pub async fn get_by_agent_id(&self, agent_id: &str) -> Option<String> {
        if let Some(cache) = self.gateway.get().await {
            match cache.scan(&KeySpace::Session.pattern()).await {
                Ok(keys) => {
                    for key in keys {
                        let Some(session_id) = KeySpace::Session.strip(&key) else {
                            continue;
                        };
                        if let Some(binding) = self.load_shared(cache.as_ref(), session_id).await {
                            if binding.agent_id == agent_id {
                                return Some(binding.session_id);
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Session scan failed, searching local mirror"),
            }
        }

        let now = self.clock.now_ms();
        let mut mirror = self.mirror.write().await;
        mirror.retain(|_, b| self.is_live(b, now));
        let mut matches: Vec<&SessionBinding> =
            mirror.values().filter(|b| b.agent_id == agent_id).collect();
        // Deterministic pick when several sessions map to the same agent.
        matches.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        matches.first().map(|b| b.session_id.clone())
    }

    pub async fn health_check(&self) -> SessionHealth {
        let backend = if self.gateway.get().await.is_some() {
            SessionBackend::Shared
        } else {
            SessionBackend::Local
        };
        let now = self.clock.now_ms();
        let mirror_size = self
            .mirror
            .read()
            .await
            .values()
            .filter(|b| self.is_live(b, now))
            .count();
        SessionHealth {
            backend,
            mirror_size,
        }
    }

    fn is_live(&self, binding: &SessionBinding, now: u64) -> bool {
        binding.expires_at(self.ttl) > now
    }

    async fn load_shared(
        &self,
        cache: &dyn CacheBackend,
        session_id: &str,
    ) -> Option<SessionBinding> {
        let key = KeySpace::Session.key(session_id);
        let raw = match cache.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Shared session read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(binding) => Some(binding),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Discarding corrupt session binding");
                let _ = cache.delete(&key).await;
                None
            }
        }
    }

    async fn store_shared(&self, cache: &dyn CacheBackend, binding: &SessionBinding) {
        let key = KeySpace::Session.key(&binding.session_id);
        let raw = match serde_json::to_string(binding) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(session_id = %binding.session_id, error = %e, "Could not serialize binding");
                return;
            }
        };
        if let Err(e) = cache.set(&key, &raw, Some(self.ttl)).await {
            tracing::warn!(
                session_id = %binding.session_id,
                error = %e,
                "Shared session write failed, binding kept in local mirror"
            );
        }
    }
}
