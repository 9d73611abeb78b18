use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::infrastructure::{StorageBackend, StorageRecord};
use crate::types::HealthReport;

/// Process-local storage. Records vanish with the process.
pub struct InMemoryBackend {
    name: String,
    // (collection, key) -> record
    records: RwLock<BTreeMap<(String, String), StorageRecord>>,
    failing: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable {
                backend: self.name.clone(),
                reason: "simulated outage".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StorageRecord>> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, record: StorageRecord) -> StorageResult<()> {
        self.check()?;
        self.records
            .write()
            .await
            .insert((record.collection.clone(), record.key.clone()), record);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        self.check()?;
        Ok(self
            .records
            .write()
            .await
            .remove(&(collection.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<StorageRecord>> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn health_check(&self) -> HealthReport {
        match self.check() {
            Ok(()) => HealthReport::healthy(&self.name),
            Err(e) => HealthReport::unhealthy(&self.name, e.to_string()),
        }
    }
}
