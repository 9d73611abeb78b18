#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::cache::{CacheBackend, CacheConnector};
    use crate::cache_memory::MemoryCache;
    use crate::error::{CacheError, CacheResult};
    use crate::gateway::{Availability, CacheGateway, GatewayOptions};

    /// Connector whose reachability and backing cache can be changed mid-test.
    struct FlakyConnector {
        reachable: AtomicBool,
        connects: AtomicUsize,
        backend: Mutex<Arc<MemoryCache>>,
        connect_delay: Option<Duration>,
    }

    impl FlakyConnector {
        fn new(reachable: bool) -> Self {
            Self {
                reachable: AtomicBool::new(reachable),
                connects: AtomicUsize::new(0),
                backend: Mutex::new(Arc::new(MemoryCache::new())),
                connect_delay: None,
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn backend(&self) -> Arc<MemoryCache> {
            self.backend.lock().unwrap().clone()
        }

        fn replace_backend(&self) -> Arc<MemoryCache> {
            let fresh = Arc::new(MemoryCache::new());
            *self.backend.lock().unwrap() = fresh.clone();
            fresh
        }
    }

    #[async_trait]
    impl CacheConnector for FlakyConnector {
        fn endpoint(&self) -> String {
            "flaky://test".to_string()
        }

        async fn connect(&self) -> CacheResult<Arc<dyn CacheBackend>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(CacheError::Unavailable("connection refused".to_string()));
            }
            let backend: Arc<dyn CacheBackend> = self.backend();
            Ok(backend)
        }
    }

    fn options() -> GatewayOptions {
        GatewayOptions {
            disabled: false,
            op_timeout: Duration::from_millis(200),
            reconnect_interval: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_connects_lazily_and_reuses_handle() {
        let connector = Arc::new(FlakyConnector::new(true));
        let gateway = CacheGateway::new(connector.clone(), options());

        assert_eq!(connector.connects(), 0);
        assert_eq!(gateway.availability().await, Availability::Unknown);

        assert!(gateway.get().await.is_some());
        assert!(gateway.get().await.is_some());

        assert_eq!(connector.connects(), 1);
        assert_eq!(gateway.availability().await, Availability::Available);
        // One ping while connecting, one liveness ping on the second call.
        assert_eq!(connector.backend().ping_count(), 2);
    }

    #[tokio::test]
    async fn test_hard_disable_never_connects() {
        let connector = Arc::new(FlakyConnector::new(true));
        let gateway = CacheGateway::new(
            connector.clone(),
            GatewayOptions {
                disabled: true,
                ..options()
            },
        );

        assert!(gateway.get().await.is_none());
        assert!(gateway.is_disabled());
        assert_eq!(connector.connects(), 0);
        assert_eq!(gateway.availability().await, Availability::Unavailable);
    }

    #[tokio::test]
    async fn test_disconnected_gateway_is_always_absent() {
        let gateway = CacheGateway::disconnected();
        assert!(gateway.get().await.is_none());
        assert!(gateway.is_disabled());
    }

    #[tokio::test]
    async fn test_known_failure_skips_round_trip() {
        let connector = Arc::new(FlakyConnector::new(false));
        let gateway = CacheGateway::new(connector.clone(), options());

        assert!(gateway.get().await.is_none());
        assert!(gateway.get().await.is_none());
        assert!(gateway.get().await.is_none());

        assert_eq!(connector.connects(), 1);
        assert_eq!(gateway.availability().await, Availability::Unavailable);
    }

    #[tokio::test]
    async fn test_dead_connection_reconnects_once() {
        let connector = Arc::new(FlakyConnector::new(true));
        let gateway = CacheGateway::new(connector.clone(), options());
        assert!(gateway.get().await.is_some());

        // The old connection dies; the server behind the connector is fine.
        connector.backend().set_offline(true);
        let fresh = connector.replace_backend();

        let handle = gateway.get().await.expect("reconnected");
        handle.set("k", "v", None).await.unwrap();

        assert_eq!(connector.connects(), 2);
        assert_eq!(fresh.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_failed_reconnect_marks_unavailable() {
        let connector = Arc::new(FlakyConnector::new(true));
        let gateway = CacheGateway::new(connector.clone(), options());
        assert!(gateway.get().await.is_some());

        connector.backend().set_offline(true);
        connector.reachable.store(false, Ordering::SeqCst);

        assert!(gateway.get().await.is_none());
        assert_eq!(connector.connects(), 2);
        assert_eq!(gateway.availability().await, Availability::Unavailable);
    }

    #[tokio::test]
    async fn test_recovers_after_reconnect_interval() {
        let connector = Arc::new(FlakyConnector::new(false));
        let gateway = CacheGateway::new(
            connector.clone(),
            GatewayOptions {
                reconnect_interval: Duration::ZERO,
                ..options()
            },
        );

        assert!(gateway.get().await.is_none());
        connector.reachable.store(true, Ordering::SeqCst);
        assert!(gateway.get().await.is_some());
        assert_eq!(gateway.availability().await, Availability::Available);
    }

    #[tokio::test]
    async fn test_slow_connect_is_bounded() {
        let connector = Arc::new(FlakyConnector {
            connect_delay: Some(Duration::from_secs(10)),
            ..FlakyConnector::new(true)
        });
        let gateway = CacheGateway::new(
            connector.clone(),
            GatewayOptions {
                op_timeout: Duration::from_millis(50),
                ..options()
            },
        );

        let started = std::time::Instant::now();
        assert!(gateway.get().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_mark_unavailable_short_circuits() {
        let connector = Arc::new(FlakyConnector::new(true));
        let gateway = CacheGateway::new(connector.clone(), options());
        assert!(gateway.get().await.is_some());

        gateway.mark_unavailable().await;
        assert!(gateway.get().await.is_none());
        assert_eq!(connector.connects(), 1);
    }
}
