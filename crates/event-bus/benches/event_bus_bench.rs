use criterion::{Criterion, criterion_group, criterion_main};
use event_bus::{
    BusConfig, EventBus, EventBusExt, InMemoryEventBus, Subscription, TraceCarrier, TraceContext,
};

fn order_payload(order_id: i64) -> serde_json::Value {
    serde_json::json!({
        "event_type": "order_created",
        "order_id": order_id,
        "user_id": 1,
        "product_id": 10,
        "quantity": 2,
        "total_price": 59.98,
        "status": "pending"
    })
}

fn bench_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = InMemoryEventBus::new();
    let trace = TraceContext::new_root();

    c.bench_function("event_bus/publish_json", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.publish_json("order_events", Some("42"), &order_payload(42), &trace)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_publish_and_consume(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_bus/publish_consume_commit_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let bus = InMemoryEventBus::with_config(BusConfig { partitions: 3 });
                let trace = TraceContext::new_root();
                for id in 0..100 {
                    let key = id.to_string();
                    bus.publish_json("order_events", Some(&key), &order_payload(id), &trace)
                        .await
                        .unwrap();
                }

                let mut sub = bus.subscribe("order_events", "bench").await.unwrap();
                for _ in 0..100 {
                    let delivery = sub.next().await.unwrap();
                    sub.commit(&delivery).await.unwrap();
                }
            });
        });
    });
}

fn bench_trace_propagation(c: &mut Criterion) {
    let root = TraceContext::new_root();

    c.bench_function("event_bus/trace_inject_extract", |b| {
        b.iter(|| {
            let carrier: TraceCarrier = root.child().inject();
            TraceContext::extract(&carrier)
        });
    });
}

criterion_group!(
    benches,
    bench_publish,
    bench_publish_and_consume,
    bench_trace_propagation
);
criterion_main!(benches);
