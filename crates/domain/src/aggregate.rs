//! Core aggregate and domain event traits.

use event_store::{EventEnvelope, Version};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are facts recorded in the journal. They are immutable and
/// named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Event type name stored alongside the payload, used for filtering.
    fn event_type(&self) -> &'static str;
}

/// State that is derived by folding one journal stream.
///
/// The materialized copies kept by the services are caches: the stream is the
/// source of truth and [`Aggregate::fold`] reproduces the same value.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    /// Stream type recorded on every envelope, e.g. `"StockLedger"`.
    fn stream_type() -> &'static str;

    /// Stream category used to build stream ids, e.g. `"variant"`.
    fn stream_category() -> &'static str;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Applies an event to the state.
    ///
    /// Must be pure and must not fail: the event already happened.
    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds state from the envelopes of one stream, in sequence order.
    fn fold<'a>(envelopes: impl IntoIterator<Item = &'a EventEnvelope>) -> serde_json::Result<Self> {
        let mut aggregate = Self::default();
        for envelope in envelopes {
            let event: Self::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }
        Ok(aggregate)
    }
}
