use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A client session pinned to one agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub session_id: String,
    pub agent_id: String,
    /// When the pair was first bound (ms since epoch)
    pub bound_at: u64,
    #[serde(default)]
    pub credential_hash: Option<String>,
    /// How many times this exact pair has been bound
    pub bind_count: u64,
    /// Most recent bind of this pair (ms since epoch); the TTL runs from here
    #[serde(default)]
    pub last_bound_at: u64,
}

impl SessionBinding {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        credential_hash: Option<String>,
        now: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            bound_at: now,
            credential_hash,
            bind_count: 1,
            last_bound_at: now,
        }
    }

    /// Rebinding the same agent bumps the counter instead of starting over.
    pub fn rebind(mut self, agent_id: &str, credential_hash: Option<String>, now: u64) -> Self {
        if self.agent_id != agent_id {
            return Self::new(self.session_id, agent_id, credential_hash, now);
        }
        self.bind_count += 1;
        self.last_bound_at = now;
        if credential_hash.is_some() {
            self.credential_hash = credential_hash;
        }
        self
    }

    /// When a binding written with `ttl` stops being served.
    pub fn expires_at(&self, ttl: Duration) -> u64 {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.last_bound_at.saturating_add(ttl_ms)
    }
}

/// Where session reads are currently being served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Shared,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealth {
    pub backend: SessionBackend,
    pub mirror_size: usize,
}
