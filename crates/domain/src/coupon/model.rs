use chrono::{DateTime, Utc};
use common::{CouponId, Money};
use serde::{Deserialize, Serialize};

use super::CouponError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    /// Whole percent of the order subtotal.
    Percentage(u32),
    Fixed(Money),
}

/// Coupon definition. Usage counters live in the tracker, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub code: String,
    pub discount: Discount,
    pub minimum_order: Money,
    /// Cap for percentage discounts.
    pub maximum_discount: Option<Money>,
    /// `None` means unlimited.
    pub usage_limit: Option<u32>,
    /// `None` means unlimited.
    pub per_user_limit: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Coupon {
    pub fn new(id: CouponId, code: impl Into<String>, discount: Discount) -> Self {
        Self {
            id,
            code: normalize_code(&code.into()),
            discount,
            minimum_order: Money::zero(),
            maximum_discount: None,
            usage_limit: None,
            per_user_limit: None,
            valid_from: None,
            valid_to: None,
            active: true,
        }
    }

    pub fn usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn per_user_limit(mut self, limit: u32) -> Self {
        self.per_user_limit = Some(limit);
        self
    }

    pub fn minimum_order(mut self, minimum: Money) -> Self {
        self.minimum_order = minimum;
        self
    }

    pub fn maximum_discount(mut self, maximum: Money) -> Self {
        self.maximum_discount = Some(maximum);
        self
    }

    pub fn valid_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_to = Some(to);
        self
    }

    /// Discount for a subtotal, never more than the subtotal itself.
    /// Zero below the minimum order.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        if subtotal < self.minimum_order || !subtotal.is_positive() {
            return Money::zero();
        }

        let raw = match self.discount {
            Discount::Percentage(percent) => {
                let amount = subtotal.percent(percent);
                match self.maximum_discount {
                    Some(cap) if amount > cap => cap,
                    _ => amount,
                }
            }
            Discount::Fixed(amount) => amount,
        };

        raw.min(subtotal)
    }

    /// Definition-level checks done at checkout: active, inside the validity
    /// window, minimum order reached. Usage limits are not checked here.
    pub fn check_applicable(&self, subtotal: Money, now: DateTime<Utc>) -> Result<(), CouponError> {
        if !self.active {
            return Err(CouponError::Inactive(self.id));
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(CouponError::NotYetValid(self.id));
        }
        if self.valid_to.is_some_and(|to| now > to) {
            return Err(CouponError::Expired(self.id));
        }
        if subtotal < self.minimum_order {
            return Err(CouponError::MinimumNotMet {
                minimum: self.minimum_order,
                subtotal,
            });
        }
        Ok(())
    }
}

/// Codes are matched case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn percent(p: u32) -> Coupon {
        Coupon::new(CouponId::new(1), "save", Discount::Percentage(p))
    }

    #[test]
    fn code_is_normalized() {
        assert_eq!(percent(10).code, "SAVE");
        assert_eq!(normalize_code("  eid24 "), "EID24");
    }

    #[test]
    fn percentage_discount_with_cap() {
        let coupon = percent(20).maximum_discount(Money::from_cents(500));
        assert_eq!(coupon.discount_for(Money::from_cents(1000)), Money::from_cents(200));
        assert_eq!(coupon.discount_for(Money::from_cents(10_000)), Money::from_cents(500));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let coupon = Coupon::new(CouponId::new(2), "FLAT", Discount::Fixed(Money::from_cents(800)));
        assert_eq!(coupon.discount_for(Money::from_cents(500)), Money::from_cents(500));
        assert_eq!(coupon.discount_for(Money::from_cents(5000)), Money::from_cents(800));
    }

    #[test]
    fn minimum_order_gates_discount() {
        let coupon = percent(10).minimum_order(Money::from_cents(2000));
        assert_eq!(coupon.discount_for(Money::from_cents(1999)), Money::zero());
        assert!(matches!(
            coupon.check_applicable(Money::from_cents(1999), Utc::now()),
            Err(CouponError::MinimumNotMet { .. })
        ));
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let coupon = percent(10).valid_between(now + Duration::days(1), now + Duration::days(2));
        assert!(matches!(
            coupon.check_applicable(Money::from_cents(100), now),
            Err(CouponError::NotYetValid(_))
        ));
        assert!(matches!(
            coupon.check_applicable(Money::from_cents(100), now + Duration::days(3)),
            Err(CouponError::Expired(_))
        ));
        assert!(
            coupon
                .check_applicable(Money::from_cents(100), now + Duration::hours(36))
                .is_ok()
        );
    }

    #[test]
    fn inactive_coupon_is_rejected() {
        let mut coupon = percent(10);
        coupon.active = false;
        assert!(matches!(
            coupon.check_applicable(Money::from_cents(100), Utc::now()),
            Err(CouponError::Inactive(_))
        ));
    }
}
