//! Coupon definitions and usage accounting.

mod model;
mod tracker;
mod usage;

pub use model::{Coupon, Discount, normalize_code};
pub(crate) use tracker::LockedCoupon;
pub use tracker::CouponUsageTracker;
pub use usage::{
    CouponActivationChangedData, CouponEvent, CouponRegisteredData, CouponUsage,
    CouponUsageRecord,
};

use common::{CouponId, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which limit a consumption ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    PerCustomer,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Global => "global",
            LimitScope::PerCustomer => "per_customer",
        }
    }
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CouponError {
    #[error("Coupon not found: {0}")]
    NotFound(CouponId),

    #[error("No coupon with code {0}")]
    CodeNotFound(String),

    #[error("Coupon already registered: {0}")]
    AlreadyRegistered(CouponId),

    #[error("Coupon code already in use: {0}")]
    DuplicateCode(String),

    #[error("Coupon {0} is not active")]
    Inactive(CouponId),

    #[error("Coupon {0} is not valid yet")]
    NotYetValid(CouponId),

    #[error("Coupon {0} has expired")]
    Expired(CouponId),

    #[error("Order subtotal {subtotal} is below the coupon minimum {minimum}")]
    MinimumNotMet { minimum: Money, subtotal: Money },

    #[error("Coupon {coupon_id} usage limit reached ({scope})")]
    LimitExceeded { coupon_id: CouponId, scope: LimitScope },
}

impl CouponError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CouponError::NotFound(_) | CouponError::CodeNotFound(_))
    }
}
