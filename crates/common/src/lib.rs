//! Shared identifiers and value types for the commerce core.
//!
//! Every crate in the workspace speaks in these types so that a variant id
//! can never be confused with a coupon id, and money never travels as a float.

mod money;
mod types;

pub use money::Money;
pub use types::{Actor, CouponId, CustomerKey, OrderId, ReturnId, UserId, VariantId};
