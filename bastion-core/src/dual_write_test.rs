#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::dual_write::{DualWriteBackend, ReadPrimary};
    use crate::error::StorageError;
    use crate::infrastructure::{StorageBackend, StorageRecord};
    use crate::infrastructure_in_memory::InMemoryBackend;
    use crate::types::HealthStatus;

    fn setup(
        read_primary: ReadPrimary,
    ) -> (DualWriteBackend, Arc<InMemoryBackend>, Arc<InMemoryBackend>) {
        let a = Arc::new(InMemoryBackend::named("a"));
        let b = Arc::new(InMemoryBackend::named("b"));
        let dual = DualWriteBackend::new(a.clone(), b.clone(), read_primary);
        (dual, a, b)
    }

    fn record(key: &str, n: i64) -> StorageRecord {
        StorageRecord::new("agents", key, json!({ "n": n }), 1)
    }

    #[tokio::test]
    async fn test_writes_reach_both_backends() {
        let (dual, a, b) = setup(ReadPrimary::A);

        dual.put(record("k1", 1)).await.unwrap();

        assert!(a.get("agents", "k1").await.unwrap().is_some());
        assert!(b.get("agents", "k1").await.unwrap().is_some());
        assert_eq!(dual.degraded_write_count(), 0);
        assert_eq!(dual.name(), "dual");
    }

    #[tokio::test]
    async fn test_write_tolerates_one_failure() {
        let (dual, a, b) = setup(ReadPrimary::A);

        b.set_failing(true);
        dual.put(record("k1", 1)).await.unwrap();
        assert_eq!(dual.degraded_write_count(), 1);
        assert!(a.get("agents", "k1").await.unwrap().is_some());

        b.set_failing(false);
        a.set_failing(true);
        dual.put(record("k2", 2)).await.unwrap();
        assert_eq!(dual.degraded_write_count(), 2);
        assert!(b.get("agents", "k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_fails_only_when_both_fail() {
        let (dual, a, b) = setup(ReadPrimary::A);
        a.set_failing(true);
        b.set_failing(true);

        let err = dual.put(record("k1", 1)).await.unwrap_err();
        match err {
            StorageError::Unrecoverable { operation, .. } => assert_eq!(operation, "put"),
            other => panic!("expected Unrecoverable, got {:?}", other),
        }
        assert!(dual.delete("agents", "k1").await.is_err());
    }

    #[tokio::test]
    async fn test_read_falls_back_to_secondary() {
        let (dual, a, _b) = setup(ReadPrimary::A);
        dual.put(record("k1", 1)).await.unwrap();

        a.set_failing(true);

        let found = dual.get("agents", "k1").await.unwrap().unwrap();
        assert_eq!(found.value, json!({ "n": 1 }));
        assert_eq!(dual.list("agents").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_fails_when_both_fail() {
        let (dual, a, b) = setup(ReadPrimary::A);
        a.set_failing(true);
        b.set_failing(true);

        assert!(matches!(
            dual.get("agents", "k1").await,
            Err(StorageError::Unrecoverable { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_primary_routing() {
        let (dual, a, b) = setup(ReadPrimary::B);
        assert_eq!(dual.primary().name(), "b");
        assert_eq!(dual.secondary().name(), "a");

        // Diverge the two sides directly; reads must come from B.
        a.put(record("k1", 1)).await.unwrap();
        b.put(record("k1", 2)).await.unwrap();

        let found = dual.get("agents", "k1").await.unwrap().unwrap();
        assert_eq!(found.value, json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn test_miss_on_primary_is_not_a_failure() {
        let (dual, _a, b) = setup(ReadPrimary::A);
        b.put(record("k1", 1)).await.unwrap();

        // A healthy primary answering "absent" is authoritative.
        assert!(dual.get("agents", "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_primary_result() {
        let (dual, _a, _b) = setup(ReadPrimary::A);
        dual.put(record("k1", 1)).await.unwrap();

        assert!(dual.delete("agents", "k1").await.unwrap());
        assert!(!dual.delete("agents", "k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_health_aggregates_components() {
        let (dual, a, b) = setup(ReadPrimary::A);

        let health = dual.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.components.len(), 2);

        b.set_failing(true);
        let health = dual.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.components[0].status, HealthStatus::Healthy);
        assert_eq!(health.components[1].status, HealthStatus::Unhealthy);

        a.set_failing(true);
        assert_eq!(dual.health_check().await.status, HealthStatus::Unhealthy);
    }
}
