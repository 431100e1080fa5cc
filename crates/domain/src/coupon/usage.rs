//! Coupon usage stream: definition plus every consumption.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{Actor, CouponId, CustomerKey, OrderId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};

use super::{Coupon, CouponError, LimitScope};

/// One successful consumption of a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsageRecord {
    pub coupon_id: CouponId,
    pub customer: CustomerKey,
    pub order_id: Option<OrderId>,
    /// Global use count including this one.
    pub usage_number: u32,
    /// This customer's use count including this one.
    pub customer_usage_number: u32,
    pub actor: Actor,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponRegisteredData {
    pub coupon: Coupon,
    pub actor: Actor,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponActivationChangedData {
    pub active: bool,
    pub actor: Actor,
    pub changed_at: DateTime<Utc>,
}

/// Events on a `coupon-<id>` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CouponEvent {
    CouponRegistered(CouponRegisteredData),
    CouponConsumed(CouponUsageRecord),
    CouponActivationChanged(CouponActivationChangedData),
}

impl DomainEvent for CouponEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CouponEvent::CouponRegistered(_) => "CouponRegistered",
            CouponEvent::CouponConsumed(_) => "CouponConsumed",
            CouponEvent::CouponActivationChanged(_) => "CouponActivationChanged",
        }
    }
}

/// Materialized usage of one coupon.
#[derive(Debug, Clone, Default)]
pub struct CouponUsage {
    coupon: Option<Coupon>,
    times_used: u32,
    per_customer: HashMap<CustomerKey, u32>,
    version: Version,
}

impl Aggregate for CouponUsage {
    type Event = CouponEvent;

    fn stream_type() -> &'static str {
        "CouponUsage"
    }

    fn stream_category() -> &'static str {
        "coupon"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CouponEvent::CouponRegistered(data) => self.coupon = Some(data.coupon),
            CouponEvent::CouponConsumed(record) => {
                self.times_used += 1;
                *self.per_customer.entry(record.customer).or_default() += 1;
            }
            CouponEvent::CouponActivationChanged(data) => {
                if let Some(coupon) = self.coupon.as_mut() {
                    coupon.active = data.active;
                }
            }
        }
    }
}

impl CouponUsage {
    pub fn coupon(&self) -> Option<&Coupon> {
        self.coupon.as_ref()
    }

    pub fn times_used(&self) -> u32 {
        self.times_used
    }

    pub fn usage_count_for(&self, customer: &CustomerKey) -> u32 {
        self.per_customer.get(customer).copied().unwrap_or(0)
    }

    /// `None` when the coupon has no global limit.
    pub fn usage_remaining(&self) -> Option<u32> {
        let limit = self.coupon.as_ref()?.usage_limit?;
        Some(limit.saturating_sub(self.times_used))
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_remaining() == Some(0)
    }

    /// Checks both limits and builds the record a consumption would write.
    pub fn plan_consume(
        &self,
        coupon_id: CouponId,
        customer: &CustomerKey,
        order_id: Option<OrderId>,
        actor: &Actor,
    ) -> Result<CouponUsageRecord, CouponError> {
        let coupon = self.coupon.as_ref().ok_or(CouponError::NotFound(coupon_id))?;

        if coupon.usage_limit.is_some_and(|limit| self.times_used >= limit) {
            return Err(CouponError::LimitExceeded {
                coupon_id,
                scope: LimitScope::Global,
            });
        }

        let used_by_customer = self.usage_count_for(customer);
        if coupon
            .per_user_limit
            .is_some_and(|limit| used_by_customer >= limit)
        {
            return Err(CouponError::LimitExceeded {
                coupon_id,
                scope: LimitScope::PerCustomer,
            });
        }

        Ok(CouponUsageRecord {
            coupon_id,
            customer: customer.clone(),
            order_id,
            usage_number: self.times_used + 1,
            customer_usage_number: used_by_customer + 1,
            actor: actor.clone(),
            used_at: Utc::now(),
        })
    }
}
