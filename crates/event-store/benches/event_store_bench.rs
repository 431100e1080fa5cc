use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AppendBatch, AppendOptions, EventEnvelope, EventStore, EventStoreExt, InMemoryEventStore,
    StreamId, Version,
};

fn ledger_entry(stream: &StreamId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .stream_id(stream.clone())
        .stream_type("StockLedger")
        .event_type("StockAdjusted")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "delta": -1,
            "reason": "order_confirm",
            "quantity_before": 100 - version + 1,
            "quantity_after": 100 - version
        }))
        .build()
        .unwrap()
}

fn bench_append_single_entry(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("journal/append_single_entry", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let stream = StreamId::new("variant", 1);
                store
                    .append(vec![ledger_entry(&stream, 1)], AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_atomic_five_streams(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("journal/append_atomic_5_streams", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let batches = (1..=5)
                    .map(|id| {
                        let stream = StreamId::new("variant", id);
                        AppendBatch::new(vec![ledger_entry(&stream, 1)], AppendOptions::expect_new())
                    })
                    .collect();
                store.append_atomic(batches).await.unwrap();
            });
        });
    });
}

fn bench_read_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("variant", 1);

    rt.block_on(async {
        let entries = (1..=100).map(|v| ledger_entry(&stream, v)).collect();
        store.append(entries, AppendOptions::new()).await.unwrap();
    });

    c.bench_function("journal/read_stream_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.read_stream(&stream).await.unwrap();
            });
        });
    });
}

fn bench_read_category(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(async {
        for id in 0..10 {
            let stream = StreamId::new("variant", id);
            let entries = (1..=100).map(|v| ledger_entry(&stream, v)).collect();
            store.append(entries, AppendOptions::new()).await.unwrap();
        }
    });

    c.bench_function("journal/read_category_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let entries = store.read_category("StockLedger").await.unwrap();
                assert_eq!(entries.len(), 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_entry,
    bench_append_atomic_five_streams,
    bench_read_stream,
    bench_read_category,
);
criterion_main!(benches);
