//! Core projection trait and position tracking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::EventEnvelope;
use serde::{Deserialize, Serialize};

use crate::Result;

/// How far into the journal a projection has read. Serializable so callers
/// can checkpoint it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionPosition {
    /// Number of journal events seen, including ones the projection ignores.
    pub events_processed: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    /// The position after `event`.
    pub fn advance(&self, event: &EventEnvelope) -> Self {
        Self {
            events_processed: self.events_processed + 1,
            last_event_at: Some(event.timestamp),
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position({})", self.events_processed)
    }
}

/// A projection that folds journal events into a read model.
///
/// Every event must advance the position, even when the projection does not
/// care about its stream; catch-up relies on it to skip seen events.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Resets the projection to its initial state.
    async fn reset(&self) -> Result<()>;
}
