//! Coupon usage read model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CouponId, CustomerKey, OrderId};
use domain::Aggregate;
use domain::coupon::{CouponEvent, CouponUsage, normalize_code};
use event_store::{EventEnvelope, StreamId};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponUsageSummary {
    pub coupon_id: CouponId,
    pub code: String,
    pub active: bool,
    pub usage_limit: Option<u32>,
    pub per_user_limit: Option<u32>,
    pub times_used: u32,
    pub per_customer: HashMap<CustomerKey, u32>,
    pub orders: Vec<OrderId>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CouponUsageSummary {
    /// `None` for unlimited coupons.
    pub fn remaining(&self) -> Option<u32> {
        self.usage_limit.map(|limit| limit.saturating_sub(self.times_used))
    }

    /// Usage past a configured limit. Should never happen.
    pub fn is_over_limit(&self) -> bool {
        let global = self.usage_limit.is_some_and(|limit| self.times_used > limit);
        let per_user = self
            .per_user_limit
            .is_some_and(|limit| self.per_customer.values().any(|&n| n > limit));
        global || per_user
    }
}

#[derive(Default)]
struct CouponUsageState {
    coupons: HashMap<StreamId, CouponUsageSummary>,
    by_code: HashMap<String, StreamId>,
    position: ProjectionPosition,
}

#[derive(Clone, Default)]
pub struct CouponUsageView {
    state: Arc<RwLock<CouponUsageState>>,
}

impl CouponUsageView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, coupon_id: CouponId) -> Option<CouponUsageSummary> {
        let stream_id = StreamId::new(CouponUsage::stream_category(), coupon_id);
        self.state.read().await.coupons.get(&stream_id).cloned()
    }

    /// Case-insensitive lookup by code.
    pub async fn by_code(&self, code: &str) -> Option<CouponUsageSummary> {
        let state = self.state.read().await;
        let id = state.by_code.get(&normalize_code(code))?;
        state.coupons.get(id).cloned()
    }

    pub async fn exhausted(&self) -> Vec<CouponUsageSummary> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .coupons
            .values()
            .filter(|c| c.remaining() == Some(0))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.coupon_id);
        out
    }

    pub async fn over_limit(&self) -> Vec<CouponUsageSummary> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state.coupons.values().filter(|c| c.is_over_limit()).cloned().collect();
        out.sort_by_key(|c| c.coupon_id);
        out
    }
}

#[async_trait]
impl Projection for CouponUsageView {
    fn name(&self) -> &'static str {
        "CouponUsageView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance(event);
        if event.stream_type != CouponUsage::stream_type() {
            return Ok(());
        }

        match event.decode::<CouponEvent>()? {
            CouponEvent::CouponRegistered(data) => {
                let coupon = data.coupon;
                state
                    .by_code
                    .insert(normalize_code(&coupon.code), event.stream_id.clone());
                state.coupons.insert(
                    event.stream_id.clone(),
                    CouponUsageSummary {
                        coupon_id: coupon.id,
                        code: coupon.code,
                        active: coupon.active,
                        usage_limit: coupon.usage_limit,
                        per_user_limit: coupon.per_user_limit,
                        times_used: 0,
                        per_customer: HashMap::new(),
                        orders: Vec::new(),
                        last_used_at: None,
                    },
                );
            }
            CouponEvent::CouponConsumed(record) => {
                if let Some(summary) = state.coupons.get_mut(&event.stream_id) {
                    summary.times_used += 1;
                    *summary.per_customer.entry(record.customer).or_default() += 1;
                    summary.orders.extend(record.order_id);
                    summary.last_used_at = Some(record.used_at);
                }
            }
            CouponEvent::CouponActivationChanged(data) => {
                if let Some(summary) = state.coupons.get_mut(&event.stream_id) {
                    summary.active = data.active;
                }
            }
        }
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = CouponUsageState::default();
        Ok(())
    }
}

impl ReadModel for CouponUsageView {
    fn name(&self) -> &'static str {
        "CouponUsageView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.coupons.len()).unwrap_or(0)
    }
}
