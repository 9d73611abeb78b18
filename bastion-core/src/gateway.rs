//! Lazy, self-healing access to the shared cache.
//!
//! [`CacheGateway::get`] never fails: callers receive `None` whenever the
//! cache is disabled, unreachable, or known to be down, and fall back to
//! their local strategy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::{CacheBackend, CacheConnector};
use crate::error::{CacheError, CacheResult};

/// Tri-state availability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Unknown,
    Available,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Force "unavailable" regardless of connectivity.
    pub disabled: bool,
    /// Upper bound for a single connect or ping.
    pub op_timeout: Duration,
    /// How long a known failure short-circuits `get()` before one reconnect
    /// is tried again.
    pub reconnect_interval: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            disabled: false,
            op_timeout: Duration::from_millis(500),
            reconnect_interval: Duration::from_secs(30),
        }
    }
}

struct GatewayState {
    availability: Availability,
    handle: Option<Arc<dyn CacheBackend>>,
    failed_at: Option<Instant>,
}

pub struct CacheGateway {
    connector: Option<Arc<dyn CacheConnector>>,
    options: GatewayOptions,
    state: Mutex<GatewayState>,
}

impl CacheGateway {
    pub fn new(connector: Arc<dyn CacheConnector>, options: GatewayOptions) -> Self {
        if options.disabled {
            tracing::info!(endpoint = %connector.endpoint(), "Shared cache disabled by configuration");
        }
        Self {
            connector: Some(connector),
            options,
            state: Mutex::new(GatewayState {
                availability: Availability::Unknown,
                handle: None,
                failed_at: None,
            }),
        }
    }

    /// A gateway with nothing to connect to. Every `get()` returns `None`.
    pub fn disconnected() -> Self {
        tracing::info!("No shared cache configured, running on local fallbacks");
        Self {
            connector: None,
            options: GatewayOptions {
                disabled: true,
                ..GatewayOptions::default()
            },
            state: Mutex::new(GatewayState {
                availability: Availability::Unavailable,
                handle: None,
                failed_at: None,
            }),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.options.disabled || self.connector.is_none()
    }

    pub async fn availability(&self) -> Availability {
        if self.is_disabled() {
            return Availability::Unavailable;
        }
        self.state.lock().await.availability
    }

    /// Returns a live cache handle, or `None` if the cache cannot be used
    /// right now.
    ///
    /// A cached handle is pinged first. If the ping fails the handle is
    /// dropped and exactly one reconnect is attempted.
    pub async fn get(&self) -> Option<Arc<dyn CacheBackend>> {
        let connector = match &self.connector {
            Some(c) if !self.options.disabled => c,
            _ => return None,
        };

        let mut state = self.state.lock().await;

        if state.availability == Availability::Unavailable {
            let cooling_down = state
                .failed_at
                .is_some_and(|at| at.elapsed() < self.options.reconnect_interval);
            if cooling_down {
                return None;
            }
        }

        if let Some(handle) = state.handle.clone() {
            match self.bounded(handle.ping()).await {
                Ok(()) => {
                    state.availability = Availability::Available;
                    return Some(handle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Shared cache ping failed, reconnecting");
                    state.handle = None;
                }
            }
        }

        match self.connect_once(connector.as_ref()).await {
            Ok(handle) => {
                if state.availability != Availability::Available {
                    tracing::info!(endpoint = %connector.endpoint(), "Shared cache connected");
                }
                state.availability = Availability::Available;
                state.failed_at = None;
                state.handle = Some(Arc::clone(&handle));
                Some(handle)
            }
            Err(e) => {
                if state.availability != Availability::Unavailable {
                    tracing::warn!(
                        endpoint = %connector.endpoint(),
                        error = %e,
                        "Shared cache unavailable, falling back to local strategies"
                    );
                }
                state.availability = Availability::Unavailable;
                state.failed_at = Some(Instant::now());
                None
            }
        }
    }

    /// Records a failure observed mid-operation so the next `get()` skips the
    /// round-trip until the reconnect interval has passed.
    pub async fn mark_unavailable(&self) {
        let mut state = self.state.lock().await;
        state.availability = Availability::Unavailable;
        state.handle = None;
        state.failed_at = Some(Instant::now());
    }

    async fn connect_once(
        &self,
        connector: &dyn CacheConnector,
    ) -> CacheResult<Arc<dyn CacheBackend>> {
        let handle = self.bounded(connector.connect()).await?;
        self.bounded(handle.ping()).await?;
        Ok(handle)
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        tokio::time::timeout(self.options.op_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.options.op_timeout))?
    }
}
