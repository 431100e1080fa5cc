//! Order aggregate, status graph and the services that move orders along it.

mod aggregate;
mod coordinator;
mod events;
mod state_machine;
mod status;
mod value_objects;

pub use aggregate::{Order, TransitionCheck};
pub use coordinator::ReservationCoordinator;
pub use events::{
    OrderEvent, OrderPlacedData, PaymentRecordedData, ReturnResolvedData, StatusChangedData,
    TransitionRejectedData,
};
pub use state_machine::{NewOrder, OrderStateMachine};
pub use status::{OrderStatus, StockEffect};
pub use value_objects::{
    Milestones, OrderItem, OrderTotals, PaymentMethod, PaymentStatus, ReturnRequest,
    ReturnStatus, StatusLogEntry, StockLine, TransitionOutcome,
};

use common::{OrderId, ReturnId, VariantId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Return request not found: {0}")]
    ReturnNotFound(ReturnId),

    /// The aggregate has no `OrderPlaced` event yet.
    #[error("Order has not been placed")]
    NotPlaced,

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order has no items")]
    EmptyOrder,

    #[error("Invalid quantity {quantity} for variant {variant_id}")]
    InvalidQuantity { variant_id: VariantId, quantity: u32 },

    #[error("Invalid return line for variant {variant_id}: {reason}")]
    InvalidReturnLine { variant_id: VariantId, reason: String },
}

impl OrderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrderError::NotFound(_) | OrderError::ReturnNotFound(_))
    }
}

fn record_transition(from: OrderStatus, to: OrderStatus) {
    metrics::counter!("order_transitions_total", "from" => from.as_str(), "to" => to.as_str())
        .increment(1);
}
