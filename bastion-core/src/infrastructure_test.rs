#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use crate::infrastructure::{StorageBackend, StorageRecord};
    use crate::infrastructure_file::FileBackend;
    use crate::infrastructure_in_memory::InMemoryBackend;
    use crate::types::HealthStatus;

    /// Behaviour every adapter must share.
    async fn exercise_backend(backend: &dyn StorageBackend) {
        assert!(backend.get("agents", "a1").await.unwrap().is_none());

        backend
            .put(StorageRecord::new("agents", "a2", json!({"state": "idle"}), 10))
            .await
            .unwrap();
        backend
            .put(StorageRecord::new("agents", "a1", json!({"state": "busy"}), 11))
            .await
            .unwrap();
        backend
            .put(StorageRecord::new("tasks", "t1", json!([1, 2, 3]), 12))
            .await
            .unwrap();

        let a1 = backend.get("agents", "a1").await.unwrap().unwrap();
        assert_eq!(a1.value, json!({"state": "busy"}));
        assert_eq!(a1.updated_at, 11);

        // Replace keeps one record per key.
        backend
            .put(StorageRecord::new("agents", "a1", json!({"state": "done"}), 20))
            .await
            .unwrap();
        let listed = backend.list("agents").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a1", "a2"]);
        assert_eq!(listed[0].value, json!({"state": "done"}));

        assert!(backend.delete("agents", "a1").await.unwrap());
        assert!(!backend.delete("agents", "a1").await.unwrap());
        assert!(backend.get("agents", "a1").await.unwrap().is_none());
        assert_eq!(backend.list("tasks").await.unwrap().len(), 1);
        assert!(backend.list("missing").await.unwrap().is_empty());

        assert_eq!(backend.health_check().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_in_memory_backend_contract() {
        let backend = InMemoryBackend::new();
        exercise_backend(&backend).await;
        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_in_memory_backend_simulated_outage() {
        let backend = InMemoryBackend::named("a");
        backend.set_failing(true);

        assert!(backend.get("agents", "a1").await.is_err());
        assert!(backend
            .put(StorageRecord::new("agents", "a1", json!(null), 0))
            .await
            .is_err());
        let health = backend.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.name, "a");

        backend.set_failing(false);
        assert!(backend.get("agents", "a1").await.is_ok());
    }

    #[tokio::test]
    async fn test_file_backend_contract() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("store"));
        exercise_backend(&backend).await;

        assert!(dir.path().join("store/agents/a2.json").exists());
    }

    #[tokio::test]
    async fn test_file_backend_survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileBackend::new(dir.path())
            .put(StorageRecord::new("agents", "a1", json!({"n": 1}), 5))
            .await
            .unwrap();

        let reopened = FileBackend::new(dir.path());
        let record = reopened.get("agents", "a1").await.unwrap().unwrap();
        assert_eq!(record.value, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_file_backend_keeps_lookalike_keys_apart() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("store"));

        for (key, value) in [("a/b", "first"), ("a_b", "second"), ("a?b", "third"), ("", "empty")] {
            backend
                .put(StorageRecord::new("agents", key, json!(value), 0))
                .await
                .unwrap();
        }

        let record = backend.get("agents", "a/b").await.unwrap().unwrap();
        assert_eq!(record.key, "a/b");
        assert_eq!(record.value, json!("first"));
        assert_eq!(
            backend.get("agents", "a_b").await.unwrap().unwrap().value,
            json!("second")
        );

        let listed = backend.list("agents").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["", "a/b", "a?b", "a_b"]);

        assert!(backend.delete("agents", "a/b").await.unwrap());
        assert!(backend.get("agents", "a_b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_backend_list_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path());
        backend
            .put(StorageRecord::new("agents", "a1", json!(1), 0))
            .await
            .unwrap();

        // A document whose name does not match its key is not ours to list.
        let copied = std::fs::read(dir.path().join("agents/a1.json")).unwrap();
        std::fs::write(dir.path().join("agents/other.json"), copied).unwrap();
        std::fs::write(dir.path().join("agents/bad%zz.json"), b"{}").unwrap();

        let listed = backend.list("agents").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "a1");
    }

    #[tokio::test]
    async fn test_file_backend_confines_keys_to_collection() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("store"));

        backend
            .put(StorageRecord::new("agents", "../escape", json!(1), 0))
            .await
            .unwrap();

        assert!(!dir.path().join("escape.json").exists());
        assert!(backend.get("agents", "../escape").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_backend_unwritable_root_is_unhealthy() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let backend = FileBackend::new(blocker.join("store"));
        assert_eq!(backend.health_check().await.status, HealthStatus::Unhealthy);
        assert!(backend
            .put(StorageRecord::new("agents", "a1", json!(1), 0))
            .await
            .is_err());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_backend_contract() {
        let backend = crate::infrastructure_sqlite::SqliteBackend::open_in_memory().unwrap();
        exercise_backend(&backend).await;
        assert_eq!(backend.name(), "sqlite");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_backend_persists_to_disk() {
        use crate::infrastructure_sqlite::SqliteBackend;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bastion.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .put(StorageRecord::new("agents", "a1", json!({"n": 7}), 3))
                .await
                .unwrap();
        }

        let reopened = SqliteBackend::open(&path).unwrap();
        let record = reopened.get("agents", "a1").await.unwrap().unwrap();
        assert_eq!(record.value, json!({"n": 7}));
        assert_eq!(record.updated_at, 3);
    }
}
