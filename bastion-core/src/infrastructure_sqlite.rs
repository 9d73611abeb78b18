//! SQLite-backed StorageBackend implementation.
//! Provides persistent record storage shared by every process on the host.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! bastion-core = { path = "../bastion-core", features = ["sqlite"] }
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StorageError, StorageResult};
use crate::infrastructure::{StorageBackend, StorageRecord};
use crate::types::HealthReport;

/// A persistent record store backed by SQLite.
///
/// Uses WAL mode so readers in other processes are not blocked by a writer.
/// Statements run on tokio's blocking pool.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// A private in-memory database, mainly for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                collection  TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL,
                PRIMARY KEY (collection, key)
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StorageError::Join("sqlite connection mutex poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, u64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode(
        (collection, key, value, updated_at): (String, String, String, u64),
    ) -> StorageResult<StorageRecord> {
        Ok(StorageRecord {
            collection,
            key,
            value: serde_json::from_str(&value)?,
            updated_at,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StorageRecord>> {
        let (collection, key) = (collection.to_string(), key.to_string());
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT collection, key, value, updated_at FROM records
                     WHERE collection = ?1 AND key = ?2",
                    params![collection, key],
                    Self::row_to_record,
                )
                .optional()?;
            row.map(Self::decode).transpose()
        })
        .await
    }

    async fn put(&self, record: StorageRecord) -> StorageResult<()> {
        let value = serde_json::to_string(&record.value)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO records (collection, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (collection, key)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![record.collection, record.key, value, record.updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let (collection, key) = (collection.to_string(), key.to_string());
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<StorageRecord>> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT collection, key, value, updated_at FROM records
                 WHERE collection = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![collection], Self::row_to_record)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(Self::decode(row?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn health_check(&self) -> HealthReport {
        let check = self
            .with_conn(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await;
        match check {
            Ok(()) => HealthReport::healthy(self.name()),
            Err(e) => HealthReport::unhealthy(self.name(), e.to_string()),
        }
    }
}
