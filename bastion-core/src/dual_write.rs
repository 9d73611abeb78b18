//! Two storage backends behind one logical backend.
//!
//! Writes fan out to both adapters concurrently and succeed if either side
//! accepted them. Reads go to the read-primary and fall back to the other
//! adapter on failure. Divergence left behind by a one-sided write is not
//! reconciled here; that is an operator task.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::infrastructure::{StorageBackend, StorageRecord};
use crate::types::{HealthReport, HealthStatus};

/// Which adapter answers reads first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPrimary {
    #[default]
    A,
    B,
}

pub struct DualWriteBackend {
    primary: Arc<dyn StorageBackend>,
    secondary: Arc<dyn StorageBackend>,
    degraded_writes: AtomicU64,
}

impl DualWriteBackend {
    pub fn new(
        backend_a: Arc<dyn StorageBackend>,
        backend_b: Arc<dyn StorageBackend>,
        read_primary: ReadPrimary,
    ) -> Self {
        let (primary, secondary) = match read_primary {
            ReadPrimary::A => (backend_a, backend_b),
            ReadPrimary::B => (backend_b, backend_a),
        };
        tracing::info!(
            primary = primary.name(),
            secondary = secondary.name(),
            "Dual-write storage configured"
        );
        Self {
            primary,
            secondary,
            degraded_writes: AtomicU64::new(0),
        }
    }

    pub fn primary(&self) -> &Arc<dyn StorageBackend> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn StorageBackend> {
        &self.secondary
    }

    /// Writes that landed on only one adapter since start-up.
    pub fn degraded_write_count(&self) -> u64 {
        self.degraded_writes.load(Ordering::Relaxed)
    }

    /// Runs `op` against both adapters at once.
    ///
    /// Returns the read-primary's result if it succeeded, otherwise the
    /// secondary's. Fails only when both sides failed.
    pub async fn write<T, F, Fut>(&self, operation: &str, op: F) -> StorageResult<T>
    where
        F: Fn(Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let (primary, secondary) = tokio::join!(
            op(Arc::clone(&self.primary)),
            op(Arc::clone(&self.secondary))
        );

        match (primary, secondary) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(value), Err(e)) => {
                self.degraded(operation, self.secondary.name(), &e);
                Ok(value)
            }
            (Err(e), Ok(value)) => {
                self.degraded(operation, self.primary.name(), &e);
                Ok(value)
            }
            (Err(primary), Err(secondary)) => {
                tracing::error!(
                    operation,
                    primary_error = %primary,
                    secondary_error = %secondary,
                    "Write failed on both storage backends"
                );
                Err(StorageError::Unrecoverable {
                    operation: operation.to_string(),
                    primary: Box::new(primary),
                    secondary: Box::new(secondary),
                })
            }
        }
    }

    /// Runs `op` on the read-primary, retrying once on the secondary.
    pub async fn read<T, F, Fut>(&self, operation: &str, op: F) -> StorageResult<T>
    where
        F: Fn(Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let primary_err = match op(Arc::clone(&self.primary)).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        tracing::warn!(
            operation,
            backend = self.primary.name(),
            error = %primary_err,
            "Read-primary failed, reading from secondary"
        );
        match op(Arc::clone(&self.secondary)).await {
            Ok(value) => Ok(value),
            Err(secondary_err) => Err(StorageError::Unrecoverable {
                operation: operation.to_string(),
                primary: Box::new(primary_err),
                secondary: Box::new(secondary_err),
            }),
        }
    }

    fn degraded(&self, operation: &str, backend: &str, error: &StorageError) {
        self.degraded_writes.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            operation,
            backend,
            error = %error,
            "Write accepted by one backend only, consistency degraded"
        );
    }
}

#[async_trait]
impl StorageBackend for DualWriteBackend {
    fn name(&self) -> &str {
        "dual"
    }

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StorageRecord>> {
        self.read("get", |b| async move { b.get(collection, key).await })
            .await
    }

    async fn put(&self, record: StorageRecord) -> StorageResult<()> {
        self.write("put", |b| {
            let record = record.clone();
            async move { b.put(record).await }
        })
        .await
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        self.write("delete", |b| async move { b.delete(collection, key).await })
            .await
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<StorageRecord>> {
        self.read("list", |b| async move { b.list(collection).await })
            .await
    }

    async fn health_check(&self) -> HealthReport {
        let (primary, secondary) =
            tokio::join!(self.primary.health_check(), self.secondary.health_check());

        let unhealthy = [&primary, &secondary]
            .iter()
            .filter(|r| !r.is_healthy())
            .count();
        let (status, detail) = match unhealthy {
            0 => (HealthStatus::Healthy, None),
            1 => (
                HealthStatus::Degraded,
                Some("one storage backend is unhealthy".to_string()),
            ),
            _ => (
                HealthStatus::Unhealthy,
                Some("both storage backends are unhealthy".to_string()),
            ),
        };

        HealthReport {
            name: self.name().to_string(),
            status,
            detail,
            components: vec![primary, secondary],
        }
    }
}
