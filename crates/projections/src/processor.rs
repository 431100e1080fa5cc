//! Projection processor for feeding journal events to projections.

use std::sync::Arc;

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;

use crate::Result;
use crate::projection::Projection;

/// Replays the journal, in commit order, into registered projections.
///
/// The processor supports:
/// - Catch-up: delivers every event a projection has not seen yet
/// - Single event delivery
/// - Rebuild: resets all projections and replays from scratch
pub struct ProjectionProcessor {
    store: Arc<dyn EventStore>,
    projections: Vec<Box<dyn Projection>>,
}

impl ProjectionProcessor {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Streams all events from the journal and delivers them to each
    /// projection that hasn't already seen them.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let mut stream = self.store.stream_all_events().await?;
        let mut event_index: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            event_index += 1;

            for projection in &self.projections {
                let pos = projection.position().await;
                if pos.events_processed < event_index {
                    projection.handle(&event).await?;
                    metrics::counter!("projections_events_processed", "projection" => projection.name())
                        .increment(1);
                }
            }
        }

        tracing::info!(events = event_index, "catch-up complete");
        Ok(event_index)
    }

    /// Delivers a single event to all registered projections.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Resets all projections and replays the whole journal.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}
