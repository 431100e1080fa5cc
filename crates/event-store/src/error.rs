use thiserror::Error;

use crate::{StreamId, Version};

/// Errors that can occur when interacting with the journal.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream head moved between read and append.
    #[error(
        "Concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream_id: StreamId,
        expected: Version,
        actual: Version,
    },

    /// The append request itself was malformed (empty, mixed streams, gaps).
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The backend refused the write (used by test doubles and I/O failures).
    #[error("Journal unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for journal operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
