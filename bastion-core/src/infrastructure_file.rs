//! Directory-backed StorageBackend: one JSON document per record at
//! `{root}/{collection}/{key}.json`, with both components passed through
//! [`encode_file_component`] so every key gets its own file.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::infrastructure::{StorageBackend, StorageRecord};
use crate::types::{decode_file_component, encode_file_component, HealthReport};

pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(encode_file_component(collection))
    }

    fn record_path(&self, collection: &str, key: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", encode_file_component(key)))
    }

    async fn read_record(path: &Path) -> StorageResult<Option<StorageRecord>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StorageRecord>> {
        Self::read_record(&self.record_path(collection, key)).await
    }

    async fn put(&self, record: StorageRecord) -> StorageResult<()> {
        let dir = self.collection_dir(&record.collection);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.record_path(&record.collection, &record.key);
        // Write-then-rename so readers never observe a half-written document.
        let tmp = dir.join(format!(".{}.tmp", nanoid::nanoid!(10)));
        let bytes = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        match tokio::fs::remove_file(self.record_path(collection, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<StorageRecord>> {
        let mut dir = match tokio::fs::read_dir(self.collection_dir(collection)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_file_component)
            else {
                continue;
            };
            if let Some(record) = Self::read_record(&path).await? {
                if record.key != key {
                    tracing::warn!(
                        path = %path.display(),
                        "Record key does not match its file name, skipping"
                    );
                    continue;
                }
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn health_check(&self) -> HealthReport {
        let check = async {
            tokio::fs::create_dir_all(&self.root).await?;
            let marker = self.root.join(format!(".health-{}", nanoid::nanoid!(6)));
            tokio::fs::write(&marker, b"ok").await?;
            tokio::fs::remove_file(&marker).await
        };
        match check.await {
            Ok(()) => HealthReport::healthy(self.name()),
            Err(e) => HealthReport::unhealthy(self.name(), e.to_string()),
        }
    }
}
