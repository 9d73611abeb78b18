use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

use bastion_core::cache::StaticConnector;
use bastion_core::cache_memory::MemoryCache;
use bastion_core::dual_write::{DualWriteBackend, ReadPrimary};
use bastion_core::gateway::{CacheGateway, GatewayOptions};
use bastion_core::infrastructure::{StorageBackend, StorageRecord};
use bastion_core::infrastructure_in_memory::InMemoryBackend;
use bastion_core::rate_limit::{RateLimiter, UnavailablePolicy};
use bastion_core::session::SessionCache;
use bastion_core::time::SystemClock;

fn gateway() -> Arc<CacheGateway> {
    Arc::new(CacheGateway::new(
        Arc::new(StaticConnector::new(Arc::new(MemoryCache::new()))),
        GatewayOptions::default(),
    ))
}

fn bench_rate_limiter(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let window = Duration::from_secs(60);

    c.bench_function("rate_limit_check_and_record", |b| {
        let limiter = RateLimiter::new(
            gateway(),
            Arc::new(SystemClock),
            UnavailablePolicy::FailOpen,
            Duration::from_secs(60),
        );
        b.iter(|| {
            rt.block_on(async {
                if limiter.check("agent-1", usize::MAX, window, "llm_call").await {
                    limiter.record("agent-1", window, "llm_call").await;
                }
                // Keep the window from growing across iterations.
                limiter.reset("agent-1", "llm_call").await
            })
        })
    });
}

fn bench_session_bind(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("session_bind");

    for sessions in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("sessions", sessions), &sessions, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let cache = SessionCache::new(
                        gateway(),
                        Arc::new(SystemClock),
                        Duration::from_secs(86_400),
                    );
                    for i in 0..n {
                        cache
                            .bind(&format!("s{}", i), &format!("agent-{}", i % 16), None)
                            .await;
                    }
                    black_box(cache.get_by_agent_id("agent-3").await)
                })
            })
        });
    }
    group.finish();
}

fn bench_dual_write(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dual = DualWriteBackend::new(
        Arc::new(InMemoryBackend::named("a")),
        Arc::new(InMemoryBackend::named("b")),
        ReadPrimary::A,
    );

    c.bench_function("dual_write_put_get", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            i += 1;
            rt.block_on(async {
                let key = format!("k{}", i % 1024);
                dual.put(StorageRecord::new("agents", key.clone(), json!({ "n": i }), i))
                    .await
                    .unwrap();
                black_box(dual.get("agents", &key).await.unwrap())
            })
        })
    });
}

criterion_group!(benches, bench_rate_limiter, bench_session_bind, bench_dual_write);
criterion_main!(benches);
