//! Order status graph.

use serde::{Deserialize, Serialize};

use crate::inventory::AdjustmentReason;

/// The status of an order.
///
/// Legal edges:
/// ```text
/// pending          ──► confirmed | cancelled
/// confirmed        ──► processing | cancelled
/// processing       ──► shipped | cancelled
/// shipped          ──► delivered | returned
/// delivered        ──► return_requested
/// return_requested ──► return_approved | return_rejected
/// return_approved  ──► returned
/// cancelled        ──► refunded
/// returned         ──► refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    ReturnRequested,
    ReturnApproved,
    ReturnRejected,
    Returned,
    Refunded,
}

/// Stock side effect bound to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Deduct every tracked item.
    Deduct,
    /// Put committed stock back.
    Restock(AdjustmentReason),
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 11] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::ReturnRequested,
        OrderStatus::ReturnApproved,
        OrderStatus::ReturnRejected,
        OrderStatus::Returned,
        OrderStatus::Refunded,
    ];

    /// Statuses reachable in one step.
    pub fn next_statuses(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered, Returned],
            Delivered => &[ReturnRequested],
            ReturnRequested => &[ReturnApproved, ReturnRejected],
            ReturnApproved => &[Returned],
            Cancelled | Returned => &[Refunded],
            ReturnRejected | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        self.next_statuses().contains(&to)
    }

    /// The stock effect of the edge `self -> to`. Only meaningful for legal edges.
    pub fn stock_effect(&self, to: OrderStatus) -> StockEffect {
        use OrderStatus::*;
        match (self, to) {
            (Pending, Confirmed) => StockEffect::Deduct,
            (Confirmed | Processing, Cancelled) => {
                StockEffect::Restock(AdjustmentReason::OrderCancelRestock)
            }
            (Shipped | ReturnApproved, Returned) => {
                StockEffect::Restock(AdjustmentReason::ReturnRestock)
            }
            _ => StockEffect::None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_statuses().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::ReturnRequested => "return_requested",
            OrderStatus::ReturnApproved => "return_approved",
            OrderStatus::ReturnRejected => "return_rejected",
            OrderStatus::Returned => "returned",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
