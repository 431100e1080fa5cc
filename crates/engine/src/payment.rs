//! Payment gateway callbacks and the order transitions they drive.

use std::sync::Arc;

use common::{Actor, OrderId};
use domain::{Order, OrderStateMachine, OrderStatus, PaymentMethod, PaymentStatus};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Notification from the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentConfirmed {
        order_id: OrderId,
        /// Provider transaction id.
        reference: Option<String>,
    },
    PaymentFailed {
        order_id: OrderId,
        reason: Option<String>,
    },
}

impl PaymentEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            PaymentEvent::PaymentConfirmed { order_id, .. } | PaymentEvent::PaymentFailed { order_id, .. } => {
                *order_id
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentConfirmed { .. } => "confirmed",
            PaymentEvent::PaymentFailed { .. } => "failed",
        }
    }
}

/// Applies payment events to orders.
///
/// Every event records the payment status. Online orders still `pending`
/// are also moved: confirmed on success, cancelled on failure. Cash on
/// delivery orders are confirmed by staff, so only their payment status
/// changes.
pub struct PaymentHandler {
    orders: Arc<OrderStateMachine>,
    actor: Actor,
}

impl PaymentHandler {
    pub fn new(orders: Arc<OrderStateMachine>) -> Self {
        Self {
            orders,
            actor: Actor::new("payment-gateway"),
        }
    }

    #[tracing::instrument(skip(self), fields(order_id = %event.order_id()))]
    pub async fn handle(&self, event: &PaymentEvent) -> Result<Order> {
        metrics::counter!("payment_events_total", "kind" => event.kind()).increment(1);

        match event {
            PaymentEvent::PaymentConfirmed { order_id, reference } => {
                let order = self
                    .orders
                    .record_payment(*order_id, PaymentStatus::Paid, reference.clone(), &self.actor)
                    .await?;
                if !drives_transition(&order) {
                    return Ok(order);
                }

                match self.orders.confirm(*order_id, &self.actor).await {
                    Ok(order) => Ok(order),
                    Err(e) => {
                        // Paid but not confirmable: stays pending for staff to refund or retry.
                        tracing::warn!(%order_id, error = %e, "paid order could not be confirmed");
                        metrics::counter!("payment_confirm_failures_total").increment(1);
                        Err(e.into())
                    }
                }
            }
            PaymentEvent::PaymentFailed { order_id, reason } => {
                let order = self
                    .orders
                    .record_payment(*order_id, PaymentStatus::Failed, reason.clone(), &self.actor)
                    .await?;
                if !drives_transition(&order) {
                    return Ok(order);
                }

                let notes = reason.clone().or_else(|| Some("payment failed".to_string()));
                Ok(self.orders.cancel(*order_id, notes, &self.actor).await?)
            }
        }
    }
}

fn drives_transition(order: &Order) -> bool {
    order.payment_method() == PaymentMethod::Online && order.status() == OrderStatus::Pending
}
