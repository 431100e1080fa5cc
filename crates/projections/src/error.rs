//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Journal error: {0}")]
    Journal(#[from] event_store::EventStoreError),

    /// An event payload did not decode into the stream's event type.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The live services could not be queried while reconciling.
    #[error("Domain error: {0}")]
    Domain(#[from] domain::DomainError),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
