use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use resilience::{CircuitBreaker, CircuitBreakerConfig};

fn bench_closed_success(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());

    c.bench_function("circuit_breaker/closed_success", |b| {
        b.iter(|| {
            rt.block_on(async {
                breaker
                    .execute(|| async { Ok::<_, &str>(42) })
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_open_rejection(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreaker::new(
        "bench",
        CircuitBreakerConfig::new(1, Duration::from_secs(3600)),
    );
    rt.block_on(async {
        let _ = breaker.execute(|| async { Err::<(), _>("down") }).await;
    });

    c.bench_function("circuit_breaker/open_rejection", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = breaker.execute(|| async { Ok::<_, &str>(()) }).await;
                assert!(result.is_err());
            });
        });
    });
}

criterion_group!(benches, bench_closed_success, bench_open_rejection);
criterion_main!(benches);
