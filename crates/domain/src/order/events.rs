//! Order domain events.
//!
//! The `order-<id>` stream doubles as the order status log: every applied or
//! rejected legal transition is one event on it.

use chrono::{DateTime, Utc};
use common::{Actor, CouponId, CustomerKey, OrderId, ReturnId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{
    OrderItem, OrderStatus, OrderTotals, PaymentMethod, PaymentStatus, ReturnRequest,
    ReturnStatus, StockLine,
};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was created at checkout, in `pending`.
    OrderPlaced(OrderPlacedData),

    /// A legal transition was applied.
    StatusChanged(StatusChangedData),

    /// A legal transition was attempted and refused; status unchanged.
    TransitionRejected(TransitionRejectedData),

    ReturnRequested(ReturnRequest),

    ReturnResolved(ReturnResolvedData),

    PaymentRecorded(PaymentRecordedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StatusChanged(_) => "StatusChanged",
            OrderEvent::TransitionRejected(_) => "TransitionRejected",
            OrderEvent::ReturnRequested(_) => "ReturnRequested",
            OrderEvent::ReturnResolved(_) => "ReturnResolved",
            OrderEvent::PaymentRecorded(_) => "PaymentRecorded",
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: OrderId,
    pub customer: CustomerKey,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub coupon_id: Option<CouponId>,
    pub payment_method: PaymentMethod,
    pub actor: Actor,
    pub placed_at: DateTime<Utc>,
}

/// Data for StatusChanged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub notes: Option<String>,
    /// Stock deducted by this transition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub committed: Vec<StockLine>,
    /// Stock given back by this transition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub released: Vec<StockLine>,
    #[serde(default)]
    pub coupon_consumed: bool,
    pub changed_at: DateTime<Utc>,
}

impl StatusChangedData {
    pub fn new(from: OrderStatus, to: OrderStatus, actor: &Actor, notes: Option<String>) -> Self {
        Self {
            from,
            to,
            actor: actor.clone(),
            notes,
            committed: Vec::new(),
            released: Vec::new(),
            coupon_consumed: false,
            changed_at: Utc::now(),
        }
    }
}

/// Data for TransitionRejected event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRejectedData {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Data for ReturnResolved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnResolvedData {
    pub return_id: ReturnId,
    pub status: ReturnStatus,
    pub actor: Actor,
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Data for PaymentRecorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecordedData {
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub actor: Actor,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changed_omits_empty_stock_lines() {
        let data = StatusChangedData::new(
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            &Actor::staff("ana"),
            None,
        );
        let json = serde_json::to_value(OrderEvent::StatusChanged(data)).unwrap();

        assert_eq!(json["type"], "StatusChanged");
        assert_eq!(json["data"]["to"], "processing");
        assert!(json["data"].get("committed").is_none());
        assert!(json["data"].get("released").is_none());
    }

    #[test]
    fn event_type_names() {
        let rejected = OrderEvent::TransitionRejected(TransitionRejectedData {
            from: OrderStatus::Pending,
            to: OrderStatus::Confirmed,
            actor: Actor::system(),
            reason: "out of stock".to_string(),
            rejected_at: Utc::now(),
        });
        assert_eq!(rejected.event_type(), "TransitionRejected");
    }
}
