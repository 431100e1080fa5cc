//! Non-binding carts. Nothing here holds stock.

mod model;
mod service;

pub use model::{Cart, CartLine, CartValidation, PriceChange};
pub use service::CartService;

use common::{CustomerKey, VariantId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("Variant not found in catalog: {0}")]
    VariantNotFound(VariantId),

    #[error("Variant {0} is not for sale")]
    VariantInactive(VariantId),

    #[error("Invalid quantity {quantity} for variant {variant_id}")]
    InvalidQuantity { variant_id: VariantId, quantity: u32 },

    /// Advisory: stock may have changed by the time the order is confirmed.
    #[error("Only {available} of variant {variant_id} available, {requested} requested")]
    InsufficientStock {
        variant_id: VariantId,
        requested: u32,
        available: i64,
    },

    #[error("Variant {0} is not in the cart")]
    ItemNotFound(VariantId),

    #[error("No cart for {0}")]
    CartNotFound(CustomerKey),

    #[error("Cart is empty")]
    EmptyCart,
}

impl CartError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CartError::VariantNotFound(_) | CartError::ItemNotFound(_) | CartError::CartNotFound(_)
        )
    }
}
