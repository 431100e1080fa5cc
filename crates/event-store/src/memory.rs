use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventQuery, EventStoreError, Result, StreamId, Version,
    store::{AppendBatch, AppendOptions, EventStore, EventStream, validate_batches},
};

#[derive(Default)]
struct Journal {
    /// Commit order.
    events: Vec<EventEnvelope>,
    heads: HashMap<StreamId, Version>,
    fail_appends: bool,
}

impl Journal {
    fn head(&self, stream_id: &StreamId) -> Version {
        self.heads
            .get(stream_id)
            .copied()
            .unwrap_or(Version::initial())
    }

    fn check(&self, batch: &AppendBatch) -> Result<()> {
        let first = &batch.events[0];
        let stream_id = &first.stream_id;
        let current = self.head(stream_id);

        if let Some(expected) = batch.options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id: stream_id.clone(),
                expected,
                actual: current,
            });
        }

        // Unique (stream_id, sequence) constraint.
        if first.version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id: stream_id.clone(),
                expected: batch.options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        Ok(())
    }
}

/// In-memory journal for tests and single-process deployments.
///
/// A single write lock covers every append, which makes `append_atomic`
/// trivially all-or-nothing.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    journal: Arc<RwLock<Journal>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.journal.read().await.events.len()
    }

    /// Makes every subsequent append fail with `Unavailable` until reset.
    pub async fn set_fail_on_append(&self, fail: bool) {
        self.journal.write().await.fail_appends = fail;
    }

    pub async fn clear(&self) {
        let mut journal = self.journal.write().await;
        journal.events.clear();
        journal.heads.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let mut heads = self
            .append_atomic(vec![AppendBatch::new(events, options)])
            .await?;
        heads
            .pop()
            .ok_or_else(|| EventStoreError::InvalidAppend("no batch appended".to_string()))
    }

    async fn append_atomic(&self, batches: Vec<AppendBatch>) -> Result<Vec<Version>> {
        validate_batches(&batches)?;

        let mut journal = self.journal.write().await;
        if journal.fail_appends {
            return Err(EventStoreError::Unavailable(
                "in-memory journal configured to fail".to_string(),
            ));
        }

        for batch in &batches {
            journal.check(batch).inspect_err(|e| {
                if matches!(e, EventStoreError::ConcurrencyConflict { .. }) {
                    metrics::counter!("journal_conflicts_total").increment(1);
                }
            })?;
        }

        let mut new_heads = Vec::with_capacity(batches.len());
        for batch in batches {
            let stream_id = batch.events[0].stream_id.clone();
            let last = batch
                .events
                .last()
                .map(|e| e.version)
                .unwrap_or(Version::initial());
            journal.events.extend(batch.events);
            journal.heads.insert(stream_id, last);
            new_heads.push(last);
        }

        Ok(new_heads)
    }

    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        self.read_stream_from(stream_id, Version::initial()).await
    }

    async fn read_stream_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let journal = self.journal.read().await;
        let mut events: Vec<_> = journal
            .events
            .iter()
            .filter(|e| &e.stream_id == stream_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let journal = self.journal.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(journal
            .events
            .iter()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.journal.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        Ok(self.journal.read().await.heads.get(stream_id).copied())
    }
}
