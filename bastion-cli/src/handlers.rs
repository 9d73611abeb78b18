use std::time::Duration;

use serde::{Deserialize, Serialize};

use bastion_core::types::{HealthStatus, SessionBinding};

// ─── Validation Constants ───────────────────────────────────────────────────

const MAX_ID_LEN: usize = 256;

/// Longest window the admin surface will count over.
const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

const DEFAULT_WINDOW_SECS: u64 = 60;

// ─── Validation Helpers ─────────────────────────────────────────────────────

pub fn validate_id(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} is required", field));
    }
    if value.len() > MAX_ID_LEN {
        return Err(format!("{} must be at most {} bytes", field, MAX_ID_LEN));
    }
    if value.chars().any(|c| c.is_control() || c == '*') {
        return Err(format!("{} contains forbidden characters", field));
    }
    Ok(())
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RateLimitQuery {
    pub window_secs: Option<u64>,
}

impl RateLimitQuery {
    pub fn window(&self) -> Result<Duration, String> {
        let secs = self.window_secs.unwrap_or(DEFAULT_WINDOW_SECS);
        if secs == 0 || secs > MAX_WINDOW_SECS {
            return Err(format!(
                "window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            ));
        }
        Ok(Duration::from_secs(secs))
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct LockStatusResponse {
    pub resource_id: String,
    pub locked: bool,
}

#[derive(Serialize)]
pub struct ForceReleaseResponse {
    pub resource_id: String,
    pub removed: bool,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub agent_id: String,
    pub bound_at: u64,
    pub last_bound_at: u64,
    pub bind_count: u64,
}

impl From<SessionBinding> for SessionResponse {
    // The credential hash stays server-side.
    fn from(b: SessionBinding) -> Self {
        Self {
            session_id: b.session_id,
            agent_id: b.agent_id,
            bound_at: b.bound_at,
            last_bound_at: b.last_bound_at,
            bind_count: b.bind_count,
        }
    }
}

#[derive(Serialize)]
pub struct UnbindResponse {
    pub session_id: String,
    pub removed: bool,
}

#[derive(Serialize)]
pub struct RateLimitCountResponse {
    pub operation: String,
    pub resource_id: String,
    pub window_secs: u64,
    pub count: usize,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub reset: bool,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

#[derive(Serialize)]
pub struct HealthResponse<T: Serialize> {
    pub status: HealthStatus,
    pub version: String,
    pub layer: T,
}
