//! Sliding-window admission counter.
//!
//! Each `(operation, resource_id)` pair owns a sorted set of event
//! timestamps. Counting always prunes entries older than `now - window`
//! first. Rate limiting here is a cost-control mechanism, not a security
//! boundary, so by default it fails open when the shared cache is down.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheBackend;
use crate::error::CacheResult;
use crate::gateway::CacheGateway;
use crate::time::Clock;
use crate::types::rate_limit_key;

/// What `check` answers when the shared cache cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Admit the operation
    #[default]
    FailOpen,
    /// Reject the operation
    FailClosed,
}

impl UnavailablePolicy {
    fn admits(self) -> bool {
        self == UnavailablePolicy::FailOpen
    }
}

pub struct RateLimiter {
    gateway: Arc<CacheGateway>,
    clock: Arc<dyn Clock>,
    policy: UnavailablePolicy,
    /// Added to the window when refreshing a key's expiry
    safety_margin: Duration,
}

impl RateLimiter {
    pub fn new(
        gateway: Arc<CacheGateway>,
        clock: Arc<dyn Clock>,
        policy: UnavailablePolicy,
        safety_margin: Duration,
    ) -> Self {
        Self {
            gateway,
            clock,
            policy,
            safety_margin,
        }
    }

    pub fn policy(&self) -> UnavailablePolicy {
        self.policy
    }

    /// Whether one more `operation` on `resource_id` fits in the window.
    /// Does not record anything.
    pub async fn check(
        &self,
        resource_id: &str,
        limit: usize,
        window: Duration,
        operation: &str,
    ) -> bool {
        let Some(cache) = self.gateway.get().await else {
            return self.unavailable(resource_id, operation);
        };
        match self.count_in_window(cache.as_ref(), resource_id, window, operation).await {
            Ok(count) => count < limit,
            Err(e) => {
                tracing::warn!(resource_id, operation, error = %e, "Rate limit check failed");
                self.unavailable(resource_id, operation)
            }
        }
    }

    /// Records one admitted event and pushes the key's expiry out to
    /// `window + safety_margin`.
    pub async fn record(&self, resource_id: &str, window: Duration, operation: &str) {
        let Some(cache) = self.gateway.get().await else {
            tracing::debug!(resource_id, operation, "Shared cache unavailable, event not recorded");
            return;
        };
        let key = rate_limit_key(operation, resource_id);
        let now = self.clock.now_ms();
        let member = format!("{}:{}", now, nanoid::nanoid!(8));

        let result = async {
            cache.zadd(&key, &member, now).await?;
            cache.expire(&key, window + self.safety_margin).await?;
            CacheResult::Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(resource_id, operation, error = %e, "Could not record rate limit event");
        }
    }

    /// Events inside `[now - window, now]`. Zero when the cache is unavailable.
    pub async fn get_count(&self, resource_id: &str, window: Duration, operation: &str) -> usize {
        let Some(cache) = self.gateway.get().await else {
            return 0;
        };
        self.count_in_window(cache.as_ref(), resource_id, window, operation)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(resource_id, operation, error = %e, "Rate limit count failed");
                0
            })
    }

    /// Forgets every recorded event for the pair.
    pub async fn reset(&self, resource_id: &str, operation: &str) -> bool {
        let Some(cache) = self.gateway.get().await else {
            return false;
        };
        match cache.delete(&rate_limit_key(operation, resource_id)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(resource_id, operation, error = %e, "Rate limit reset failed");
                false
            }
        }
    }

    async fn count_in_window(
        &self,
        cache: &dyn CacheBackend,
        resource_id: &str,
        window: Duration,
        operation: &str,
    ) -> CacheResult<usize> {
        let key = rate_limit_key(operation, resource_id);
        let now = self.clock.now_ms();
        let window_start = now.saturating_sub(window.as_millis() as u64);
        if window_start > 0 {
            cache.zremrange_by_score(&key, 0, window_start - 1).await?;
        }
        cache.zcard(&key).await
    }

    fn unavailable(&self, resource_id: &str, operation: &str) -> bool {
        let admitted = self.policy.admits();
        tracing::warn!(
            resource_id,
            operation,
            policy = ?self.policy,
            admitted,
            "Rate limiter has no shared cache, applying outage policy"
        );
        admitted
    }
}
