use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{EventEnvelope, EventQuery, EventStoreError, Result, StreamId, Version};

/// Options for appending to a single stream.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected head of the stream. `None` skips the check (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The stream must not exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Entries destined for one stream inside an atomic multi-stream append.
#[derive(Debug, Clone)]
pub struct AppendBatch {
    pub events: Vec<EventEnvelope>,
    pub options: AppendOptions,
}

impl AppendBatch {
    pub fn new(events: Vec<EventEnvelope>, options: AppendOptions) -> Self {
        Self { events, options }
    }

    /// Stream of the batch; `None` for an empty batch.
    pub fn stream_id(&self) -> Option<&StreamId> {
        self.events.first().map(|e| &e.stream_id)
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Append-only journal.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends entries to one stream, all or nothing.
    ///
    /// Fails with `ConcurrencyConflict` if `options.expected_version` is set
    /// and the stream head differs. Returns the new head.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Appends to several streams as one atomic unit.
    ///
    /// Either every batch is written or none is. Each batch carries its own
    /// expected version. Returns the new head of each stream, in batch order.
    async fn append_atomic(&self, batches: Vec<AppendBatch>) -> Result<Vec<Version>>;

    /// All entries of a stream in sequence order.
    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>>;

    /// Entries of a stream with `version >= from_version`.
    async fn read_stream_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Every entry in commit order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Current head of a stream, `None` if it has no entries.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>>;
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool> {
        Ok(self.stream_version(stream_id).await?.is_some())
    }

    /// All entries of one stream type (e.g. every ledger entry) in commit order.
    async fn read_category(&self, stream_type: &str) -> Result<Vec<EventEnvelope>> {
        self.query_events(EventQuery::new().stream_type(stream_type))
            .await
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a single-stream append is well formed: non-empty, one
/// stream, consecutive versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.stream_id != first.stream_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same stream".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be sequential: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

/// Validates every batch and rejects two batches for the same stream.
pub fn validate_batches(batches: &[AppendBatch]) -> Result<()> {
    if batches.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot append zero batches".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for batch in batches {
        validate_events_for_append(&batch.events)?;
        let stream_id = &batch.events[0].stream_id;
        if !seen.insert(stream_id.clone()) {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {stream_id} appears in more than one batch"
            )));
        }
    }

    Ok(())
}
