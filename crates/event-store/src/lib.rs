//! Append-only journal.
//!
//! Every authoritative fact in the commerce core (a stock movement, a coupon
//! consumption, an order status change) is an [`EventEnvelope`] appended to a
//! stream keyed by `(stream_id, sequence)`. Current state is always
//! recomputable by folding a stream from its first entry.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, StreamId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendBatch, AppendOptions, EventStore, EventStoreExt, EventStream};
