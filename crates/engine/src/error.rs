//! Engine error types.

use domain::DomainError;
use projections::ProjectionError;
use thiserror::Error;

/// Errors returned by the [`CommerceEngine`](crate::CommerceEngine) facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Domain(e) if e.is_retryable())
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, EngineError::Domain(e) if e.is_insufficient_stock())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Domain(e) if e.is_not_found())
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
