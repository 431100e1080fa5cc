//! Staging of journal writes that must commit together.

use common::Actor;
use event_store::{AppendBatch, AppendOptions, EventEnvelope, EventStore, StreamId, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Stream id of the aggregate of type `A` identified by `key`.
pub fn stream_for<A: Aggregate>(key: impl std::fmt::Display) -> StreamId {
    StreamId::new(A::stream_category(), key)
}

/// Events for several streams committed with a single atomic append.
///
/// Each stream is guarded by the version its writer read under lock; the
/// whole unit fails if any of them moved.
pub struct UnitOfWork {
    actor: Actor,
    batches: Vec<AppendBatch>,
}

impl UnitOfWork {
    pub fn new(actor: &Actor) -> Self {
        Self {
            actor: actor.clone(),
            batches: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of streams touched so far.
    pub fn stream_count(&self) -> usize {
        self.batches.len()
    }

    /// Stages events for the aggregate at `current` version. Staging the same
    /// stream again continues its sequence. Returns the staged head.
    pub fn stage<A: Aggregate>(
        &mut self,
        stream_id: &StreamId,
        current: Version,
        events: &[A::Event],
    ) -> Result<Version, DomainError> {
        let position = self
            .batches
            .iter()
            .position(|b| b.stream_id() == Some(stream_id));

        let mut version = match position {
            Some(index) => self.batches[index]
                .events
                .last()
                .map(|e| e.version)
                .unwrap_or(current),
            None => current,
        };

        let mut envelopes = Vec::with_capacity(events.len());
        for event in events {
            version = version.next();
            envelopes.push(self.envelope::<A>(stream_id, version, event)?);
        }

        match position {
            Some(index) => self.batches[index].events.extend(envelopes),
            None if !envelopes.is_empty() => self.batches.push(AppendBatch::new(
                envelopes,
                AppendOptions::expect_version(current),
            )),
            None => {}
        }

        Ok(version)
    }

    fn envelope<A: Aggregate>(
        &self,
        stream_id: &StreamId,
        version: Version,
        event: &A::Event,
    ) -> Result<EventEnvelope, DomainError> {
        EventEnvelope::builder()
            .stream_id(stream_id.clone())
            .stream_type(A::stream_type())
            .event_type(event.event_type())
            .version(version)
            .payload(event)?
            .metadata("actor", serde_json::Value::String(self.actor.to_string()))
            .build()
            .ok_or_else(|| {
                DomainError::Journal(event_store::EventStoreError::InvalidAppend(format!(
                    "incomplete envelope for {stream_id}"
                )))
            })
    }

    /// Appends every staged batch atomically. An empty unit is a no-op.
    pub async fn commit(self, store: &dyn EventStore) -> Result<Vec<Version>, DomainError> {
        if self.batches.is_empty() {
            return Ok(Vec::new());
        }
        Ok(store.append_atomic(self.batches).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{StockEvent, VariantStock};
    use common::VariantId;
    use event_store::InMemoryEventStore;

    fn backorder_event(allow: bool) -> StockEvent {
        StockEvent::backorder_changed(VariantId::new(1), allow, Actor::system())
    }

    #[tokio::test]
    async fn stage_continues_sequence_for_same_stream() {
        let mut uow = UnitOfWork::new(&Actor::system());
        let stream = stream_for::<VariantStock>(1);

        let head = uow
            .stage::<VariantStock>(&stream, Version::initial(), &[backorder_event(true)])
            .unwrap();
        assert_eq!(head, Version::first());

        let head = uow
            .stage::<VariantStock>(&stream, Version::initial(), &[backorder_event(false)])
            .unwrap();
        assert_eq!(head, Version::new(2));
        assert_eq!(uow.stream_count(), 1);

        let store = InMemoryEventStore::new();
        uow.commit(&store).await.unwrap();
        assert_eq!(store.read_stream(&stream).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn commit_fails_when_stream_moved() {
        let store = InMemoryEventStore::new();
        let stream = stream_for::<VariantStock>(1);

        let mut first = UnitOfWork::new(&Actor::system());
        first
            .stage::<VariantStock>(&stream, Version::initial(), &[backorder_event(true)])
            .unwrap();
        first.commit(&store).await.unwrap();

        let mut stale = UnitOfWork::new(&Actor::system());
        stale
            .stage::<VariantStock>(&stream, Version::initial(), &[backorder_event(false)])
            .unwrap();
        assert!(matches!(
            stale.commit(&store).await,
            Err(DomainError::Journal(_))
        ));
    }

    #[tokio::test]
    async fn envelopes_carry_actor() {
        let store = InMemoryEventStore::new();
        let stream = stream_for::<VariantStock>(1);
        let mut uow = UnitOfWork::new(&Actor::staff("rina"));
        uow.stage::<VariantStock>(&stream, Version::initial(), &[backorder_event(true)])
            .unwrap();
        uow.commit(&store).await.unwrap();

        let stored = store.read_stream(&stream).await.unwrap();
        assert_eq!(stored[0].stream_type, "StockLedger");
        assert_eq!(stored[0].event_type, "BackorderChanged");
        assert_eq!(
            stored[0].metadata.get("actor"),
            Some(&serde_json::json!("staff:rina"))
        );
    }

    #[tokio::test]
    async fn empty_unit_commits_nothing() {
        let store = InMemoryEventStore::new();
        let uow = UnitOfWork::new(&Actor::system());
        assert!(uow.is_empty());
        assert!(uow.commit(&store).await.unwrap().is_empty());
        assert_eq!(store.event_count().await, 0);
    }
}
