use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::types::HealthReport;

/// A document persisted through a storage backend. The content is opaque to
/// this layer; only `(collection, key)` routing matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub collection: String,
    pub key: String,
    pub value: serde_json::Value,
    /// ms since epoch of the last write
    pub updated_at: u64,
}

impl StorageRecord {
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
        updated_at: u64,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            value,
            updated_at,
        }
    }
}

/// Defines the contract for storage backends.
///
/// Adapters report failures as errors; deciding whether a failure is fatal
/// is left to the caller (or to the dual-write composer).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs and health reports
    fn name(&self) -> &str;

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StorageRecord>>;

    /// Insert or replace
    async fn put(&self, record: StorageRecord) -> StorageResult<()>;

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool>;

    /// Every record in a collection, ordered by key
    async fn list(&self, collection: &str) -> StorageResult<Vec<StorageRecord>>;

    async fn health_check(&self) -> HealthReport;
}
