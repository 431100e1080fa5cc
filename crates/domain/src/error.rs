//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::cart::CartError;
use crate::coupon::CouponError;
use crate::inventory::{InventoryError, Shortage};
use crate::order::OrderError;

/// Errors surfaced by the commerce core services.
///
/// Only [`DomainError::ConcurrencyTimeout`] is retryable as-is; every other
/// kind needs the caller to change its input.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Journal error: {0}")]
    Journal(#[from] EventStoreError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Cart(#[from] CartError),

    /// A multi-item confirm found one or more variants short. Nothing changed.
    #[error("Stock unavailable for {} variant(s)", short.len())]
    StockUnavailable { short: Vec<Shortage> },

    /// A per-key lock could not be acquired in time. Nothing changed.
    #[error("Timed out waiting for {resource}")]
    ConcurrencyTimeout { resource: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::ConcurrencyTimeout { .. })
    }

    /// True for single-variant and multi-variant stock shortfalls alike.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(
            self,
            DomainError::StockUnavailable { .. }
                | DomainError::Inventory(InventoryError::InsufficientStock { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            DomainError::Inventory(e) => e.is_not_found(),
            DomainError::Coupon(e) => e.is_not_found(),
            DomainError::Order(e) => e.is_not_found(),
            DomainError::Cart(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T, E = DomainError> = std::result::Result<T, E>;
