use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventEnvelope, EventId, EventQuery, EventStoreError, Result, StreamId, Version,
    store::{AppendBatch, AppendOptions, EventStore, EventStream, validate_batches},
};

const SELECT_COLUMNS: &str =
    "SELECT event_id, event_type, stream_id, stream_type, sequence, timestamp, payload, metadata FROM journal";

/// PostgreSQL-backed journal.
///
/// Rows live in a single `journal` table with a unique
/// `(stream_id, sequence)` constraint; `position` gives the global commit order.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            stream_id: StreamId::from_raw(row.try_get::<String, _>("stream_id")?),
            stream_type: row.try_get("stream_type")?,
            version: Version::new(row.try_get("sequence")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    async fn append_batch(tx: &mut Transaction<'_, Postgres>, batch: &AppendBatch) -> Result<Version> {
        let stream_id = batch.events[0].stream_id.clone();

        let head: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM journal WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_one(&mut **tx)
                .await?;
        let actual = Version::new(head.unwrap_or(0));

        if let Some(expected) = batch.options.expected_version
            && actual != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            });
        }
        if batch.events[0].version != actual.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected: batch.options.expected_version.unwrap_or(actual),
                actual,
            });
        }

        let mut last_version = actual;
        for event in &batch.events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO journal (event_id, event_type, stream_id, stream_type, sequence, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.stream_id.as_str())
            .bind(&event.stream_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                // A concurrent writer got the same sequence first.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_stream_sequence")
                {
                    return EventStoreError::ConcurrencyConflict {
                        stream_id: stream_id.clone(),
                        expected: batch.options.expected_version.unwrap_or(actual),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_version = event.version;
        }

        Ok(last_version)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let mut heads = self
            .append_atomic(vec![AppendBatch::new(events, options)])
            .await?;
        heads
            .pop()
            .ok_or_else(|| EventStoreError::InvalidAppend("no batch appended".to_string()))
    }

    #[tracing::instrument(skip_all, fields(streams = batches.len()))]
    async fn append_atomic(&self, batches: Vec<AppendBatch>) -> Result<Vec<Version>> {
        validate_batches(&batches)?;

        let mut tx = self.pool.begin().await?;
        let mut heads = Vec::with_capacity(batches.len());
        for batch in &batches {
            // Dropping `tx` on error rolls every batch back.
            match Self::append_batch(&mut tx, batch).await {
                Ok(head) => heads.push(head),
                Err(e) => {
                    if matches!(e, EventStoreError::ConcurrencyConflict { .. }) {
                        metrics::counter!("journal_conflicts_total").increment(1);
                    }
                    tracing::debug!(error = %e, "atomic append rolled back");
                    return Err(e);
                }
            }
        }
        tx.commit().await?;

        metrics::counter!("journal_appends_total").increment(1);
        Ok(heads)
    }

    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        self.read_stream_from(stream_id, Version::initial()).await
    }

    async fn read_stream_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let sql = format!("{SELECT_COLUMNS} WHERE stream_id = $1 AND sequence >= $2 ORDER BY sequence ASC");
        let rows = sqlx::query(&sql)
            .bind(stream_id.as_str())
            .bind(from_version.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;
        let mut push = |sql: &mut String, clause: &str| {
            param_count += 1;
            sql.push_str(&clause.replace("$?", &format!("${param_count}")));
        };

        if query.stream_id.is_some() {
            push(&mut sql, " AND stream_id = $?");
        }
        if query.stream_type.is_some() {
            push(&mut sql, " AND stream_type = $?");
        }
        if query.event_types.is_some() {
            push(&mut sql, " AND event_type = ANY($?)");
        }
        if query.from_version.is_some() {
            push(&mut sql, " AND sequence >= $?");
        }
        if query.to_version.is_some() {
            push(&mut sql, " AND sequence <= $?");
        }
        if query.from_timestamp.is_some() {
            push(&mut sql, " AND timestamp >= $?");
        }
        if query.to_timestamp.is_some() {
            push(&mut sql, " AND timestamp <= $?");
        }
        sql.push_str(" ORDER BY position ASC");
        if query.limit.is_some() {
            push(&mut sql, " LIMIT $?");
        }
        if query.offset.is_some() {
            push(&mut sql, " OFFSET $?");
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(id) = &query.stream_id {
            sqlx_query = sqlx_query.bind(id.as_str());
        }
        if let Some(stream_type) = &query.stream_type {
            sqlx_query = sqlx_query.bind(stream_type);
        }
        if let Some(event_types) = &query.event_types {
            sqlx_query = sqlx_query.bind(event_types);
        }
        if let Some(from_version) = query.from_version {
            sqlx_query = sqlx_query.bind(from_version.as_i64());
        }
        if let Some(to_version) = query.to_version {
            sqlx_query = sqlx_query.bind(to_version.as_i64());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let pool = self.pool.clone();
        let sql = format!("{SELECT_COLUMNS} ORDER BY position ASC");
        let rows = sqlx::query(&sql).fetch_all(&pool).await?;
        let stream = futures_util::stream::iter(rows).map(Self::row_to_event);

        Ok(Box::pin(stream))
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM journal WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}
