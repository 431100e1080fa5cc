//! PostgreSQL journal integration tests
//!
//! All tests share one PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    AppendBatch, AppendOptions, EventEnvelope, EventQuery, EventStore, EventStoreError,
    EventStoreExt, PostgresEventStore, StreamId, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // kept alive for the whole test binary
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_journal.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE journal")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn ledger_entry(stream: &StreamId, version: i64, delta: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .stream_id(stream.clone())
        .stream_type("StockLedger")
        .event_type("StockAdjusted")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({ "delta": delta }))
        .metadata("actor", serde_json::json!("system"))
        .build()
        .unwrap()
}

fn status_entry(stream: &StreamId, version: i64, to: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .stream_id(stream.clone())
        .stream_type("Order")
        .event_type("StatusChanged")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({ "to": to }))
        .build()
        .unwrap()
}

#[tokio::test]
async fn append_and_read_stream() {
    let store = get_test_store().await;
    let stream = StreamId::new("variant", 1);

    let head = store
        .append(
            vec![ledger_entry(&stream, 1, 10), ledger_entry(&stream, 2, -3)],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(head, Version::new(2));

    let entries = store.read_stream(&stream).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].payload["delta"], -3);
    assert_eq!(
        entries[0].metadata.get("actor"),
        Some(&serde_json::json!("system"))
    );
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let store = get_test_store().await;
    let stream = StreamId::new("variant", 2);
    store
        .append(vec![ledger_entry(&stream, 1, 5)], AppendOptions::expect_new())
        .await
        .unwrap();

    let result = store
        .append(
            vec![ledger_entry(&stream, 2, 1)],
            AppendOptions::expect_version(Version::initial()),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
    assert_eq!(
        store.stream_version(&stream).await.unwrap(),
        Some(Version::first())
    );
}

#[tokio::test]
async fn atomic_append_rolls_back_every_stream() {
    let store = get_test_store().await;
    let variant = StreamId::new("variant", 3);
    let order = StreamId::new("order", "a");
    store
        .append(vec![status_entry(&order, 1, "pending")], AppendOptions::expect_new())
        .await
        .unwrap();

    // The order batch is stale, so the ledger entry must not survive.
    let result = store
        .append_atomic(vec![
            AppendBatch::new(vec![ledger_entry(&variant, 1, -2)], AppendOptions::expect_new()),
            AppendBatch::new(vec![status_entry(&order, 1, "confirmed")], AppendOptions::expect_new()),
        ])
        .await;

    assert!(result.is_err());
    assert!(!store.stream_exists(&variant).await.unwrap());
    assert_eq!(store.read_stream(&order).await.unwrap().len(), 1);
}

#[tokio::test]
async fn atomic_append_commits_every_stream() {
    let store = get_test_store().await;
    let variant = StreamId::new("variant", 4);
    let order = StreamId::new("order", "b");

    let heads = store
        .append_atomic(vec![
            AppendBatch::new(vec![ledger_entry(&variant, 1, -2)], AppendOptions::expect_new()),
            AppendBatch::new(vec![status_entry(&order, 1, "confirmed")], AppendOptions::expect_new()),
        ])
        .await
        .unwrap();

    assert_eq!(heads, vec![Version::first(), Version::first()]);
    assert!(store.stream_exists(&variant).await.unwrap());
    assert!(store.stream_exists(&order).await.unwrap());
}

#[tokio::test]
async fn read_stream_from_version() {
    let store = get_test_store().await;
    let stream = StreamId::new("variant", 5);
    let entries = (1..=3).map(|v| ledger_entry(&stream, v, 1)).collect();
    store.append(entries, AppendOptions::new()).await.unwrap();

    let tail = store
        .read_stream_from(&stream, Version::new(2))
        .await
        .unwrap();

    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].version, Version::new(2));
}

#[tokio::test]
async fn query_by_category_and_type() {
    let store = get_test_store().await;
    let variant = StreamId::new("variant", 6);
    let order = StreamId::new("order", "c");
    store
        .append(vec![ledger_entry(&variant, 1, 4)], AppendOptions::new())
        .await
        .unwrap();
    store
        .append(vec![status_entry(&order, 1, "pending")], AppendOptions::new())
        .await
        .unwrap();

    let ledger = store.read_category("StockLedger").await.unwrap();
    assert_eq!(ledger.len(), 1);

    let transitions = store
        .query_events(EventQuery::for_event_type("StatusChanged"))
        .await
        .unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].stream_id, order);
}

#[tokio::test]
async fn query_with_limit_and_offset() {
    let store = get_test_store().await;
    let stream = StreamId::new("variant", 7);
    let entries = (1..=5).map(|v| ledger_entry(&stream, v, 1)).collect();
    store.append(entries, AppendOptions::new()).await.unwrap();

    let page = store
        .query_events(EventQuery::for_stream(stream).limit(2).offset(1))
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].version, Version::new(2));
    assert_eq!(page[1].version, Version::new(3));
}

#[tokio::test]
async fn stream_all_events_in_commit_order() {
    use futures_util::StreamExt;

    let store = get_test_store().await;
    let a = StreamId::new("variant", 8);
    let b = StreamId::new("variant", 9);
    store
        .append(vec![ledger_entry(&b, 1, 1)], AppendOptions::new())
        .await
        .unwrap();
    store
        .append(vec![ledger_entry(&a, 1, 1)], AppendOptions::new())
        .await
        .unwrap();

    let events: Vec<_> = store.stream_all_events().await.unwrap().collect().await;
    let streams: Vec<_> = events.into_iter().map(|e| e.unwrap().stream_id).collect();
    assert_eq!(streams, vec![b, a]);
}
