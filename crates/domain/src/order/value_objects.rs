//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{Actor, Money, OrderId, ReturnId, VariantId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// A line of an order, snapshotted from the catalog at checkout.
///
/// Never recomputed from live catalog data afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub variant_id: VariantId,
    pub sku: String,
    pub name_at_purchase: String,
    pub unit_price: Money,
    pub quantity: u32,
    /// Copied from the catalog; untracked items never touch the ledger.
    pub track_inventory: bool,
}

impl OrderItem {
    pub fn new(
        variant_id: VariantId,
        sku: impl Into<String>,
        name_at_purchase: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            variant_id,
            sku: sku.into(),
            name_at_purchase: name_at_purchase.into(),
            unit_price,
            quantity,
            track_inventory: true,
        }
    }

    pub fn untracked(mut self) -> Self {
        self.track_inventory = false;
        self
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub total: Money,
}

impl OrderTotals {
    /// `total = subtotal - discount + shipping_fee`, floored at zero.
    pub fn compute(items: &[OrderItem], discount: Money, shipping_fee: Money) -> Self {
        let subtotal: Money = items.iter().map(OrderItem::line_total).sum();
        let discount = discount.min(subtotal);
        let total = (subtotal - discount + shipping_fee).max(Money::zero());
        Self {
            subtotal,
            discount,
            shipping_fee,
            total,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    CashOnDelivery,
    Online,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

/// A quantity of one variant, used for stock commitments and return lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(variant_id: VariantId, quantity: u32) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: ReturnId,
    pub order_id: OrderId,
    pub lines: Vec<StockLine>,
    pub reason: String,
    pub status: ReturnStatus,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReturnRequest {
    pub fn is_open(&self) -> bool {
        matches!(self.status, ReturnStatus::Requested | ReturnStatus::Approved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied,
    Rejected { reason: String },
}

/// One entry of an order's status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub notes: Option<String>,
    pub outcome: TransitionOutcome,
    pub at: DateTime<Utc>,
}

/// When the order reached each milestone, taken from its status log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestones {
    pub placed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Milestones {
    pub(crate) fn record(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        let slot = match status {
            OrderStatus::Confirmed => &mut self.confirmed_at,
            OrderStatus::Shipped => &mut self.shipped_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
            OrderStatus::Returned => &mut self.returned_at,
            OrderStatus::Refunded => &mut self.refunded_at,
            _ => return,
        };
        slot.get_or_insert(at);
    }
}
