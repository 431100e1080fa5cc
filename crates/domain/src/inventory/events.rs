//! Stock ledger events.

use chrono::{DateTime, Utc};
use common::{Actor, VariantId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::StockSettings;

/// Why a stock quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    InitialStock,
    OrderConfirm,
    OrderCancelRestock,
    ReturnRestock,
    /// Purchase receipt from a supplier.
    Restocked,
    ManualAdjustment,
    Damaged,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::InitialStock => "initial_stock",
            AdjustmentReason::OrderConfirm => "order_confirm",
            AdjustmentReason::OrderCancelRestock => "order_cancel_restock",
            AdjustmentReason::ReturnRestock => "return_restock",
            AdjustmentReason::Restocked => "restocked",
            AdjustmentReason::ManualAdjustment => "manual_adjustment",
            AdjustmentReason::Damaged => "damaged",
        }
    }
}

impl std::fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quantity change, exactly as it was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub variant_id: VariantId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub quantity_before: i64,
    pub resulting_quantity: i64,
    pub actor: Actor,
    /// e.g. the order id for confirm and restock entries.
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// Set when the entry took the quantity below zero under backorder.
    pub backorder_bypass: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRegisteredData {
    pub variant_id: VariantId,
    pub settings: StockSettings,
    pub actor: Actor,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackorderChangedData {
    pub variant_id: VariantId,
    pub allow_backorder: bool,
    pub actor: Actor,
    pub changed_at: DateTime<Utc>,
}

/// Events on a `variant-<id>` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StockEvent {
    VariantRegistered(VariantRegisteredData),
    StockAdjusted(LedgerEntry),
    BackorderChanged(BackorderChangedData),
}

impl DomainEvent for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::VariantRegistered(_) => "VariantRegistered",
            StockEvent::StockAdjusted(_) => "StockAdjusted",
            StockEvent::BackorderChanged(_) => "BackorderChanged",
        }
    }
}

impl StockEvent {
    pub fn variant_registered(variant_id: VariantId, settings: StockSettings, actor: Actor) -> Self {
        StockEvent::VariantRegistered(VariantRegisteredData {
            variant_id,
            settings,
            actor,
            registered_at: Utc::now(),
        })
    }

    pub fn backorder_changed(variant_id: VariantId, allow_backorder: bool, actor: Actor) -> Self {
        StockEvent::BackorderChanged(BackorderChangedData {
            variant_id,
            allow_backorder,
            actor,
            changed_at: Utc::now(),
        })
    }

    /// The ledger entry carried by this event, if it moved stock.
    pub fn ledger_entry(&self) -> Option<&LedgerEntry> {
        match self {
            StockEvent::StockAdjusted(entry) => Some(entry),
            _ => None,
        }
    }
}
