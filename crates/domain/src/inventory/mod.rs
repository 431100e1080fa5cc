//! Stock ledger: the only writer of per-variant quantities.

mod events;
mod ledger;
mod stock;

pub use events::{
    AdjustmentReason, BackorderChangedData, LedgerEntry, StockEvent, VariantRegisteredData,
};
pub use ledger::{Reconciliation, StockLedger};
pub(crate) use ledger::LockedVariants;
pub use stock::{Adjustment, StockSettings, VariantStock};

use common::VariantId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One variant that could not cover a requested deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub variant_id: VariantId,
    pub requested: i64,
    pub available: i64,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Variant not found in stock ledger: {0}")]
    VariantNotFound(VariantId),

    #[error("Variant already registered: {0}")]
    AlreadyRegistered(VariantId),

    #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: VariantId,
        requested: i64,
        available: i64,
    },

    #[error("Invalid quantity change {delta} for variant {variant_id}")]
    InvalidQuantity { variant_id: VariantId, delta: i64 },
}

impl InventoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InventoryError::VariantNotFound(_))
    }

    /// The shortage described by an `InsufficientStock` error.
    pub fn shortage(&self) -> Option<Shortage> {
        match self {
            InventoryError::InsufficientStock {
                variant_id,
                requested,
                available,
            } => Some(Shortage {
                variant_id: *variant_id,
                requested: *requested,
                available: *available,
            }),
            _ => None,
        }
    }
}
