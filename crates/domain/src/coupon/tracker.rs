use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use common::{Actor, CouponId, CustomerKey, Money, OrderId};
use event_store::{EventEnvelope, EventStore, EventStoreExt, StreamId};
use tokio::sync::RwLock;

use crate::aggregate::Aggregate;
use crate::config::DomainConfig;
use crate::error::{DomainError, Result};
use crate::locks::{KeyedLocks, LockError, SlotGuard};
use crate::unit_of_work::{UnitOfWork, stream_for};

use super::{
    Coupon, CouponActivationChangedData, CouponError, CouponEvent, CouponRegisteredData,
    CouponUsage, CouponUsageRecord, LimitScope, normalize_code,
};

fn coupon_lock_error(err: LockError<CouponId>) -> DomainError {
    err.or_missing(|id| CouponError::NotFound(id).into())
}

/// A coupon locked for one consumption, possibly inside a larger unit.
pub(crate) struct LockedCoupon {
    coupon_id: CouponId,
    guard: SlotGuard<CouponUsage>,
    planned: Option<CouponUsageRecord>,
}

impl LockedCoupon {
    pub(crate) fn plan(
        &mut self,
        customer: &CustomerKey,
        order_id: Option<OrderId>,
        actor: &Actor,
    ) -> Result<(), CouponError> {
        let record = self
            .guard
            .plan_consume(self.coupon_id, customer, order_id, actor)
            .inspect_err(|e| {
                if let CouponError::LimitExceeded { scope, .. } = e {
                    metrics::counter!("coupon_limit_exceeded_total", "scope" => scope.as_str())
                        .increment(1);
                }
            })?;
        self.planned = Some(record);
        Ok(())
    }

    pub(crate) fn stage(&self, uow: &mut UnitOfWork) -> Result<()> {
        if let Some(record) = &self.planned {
            uow.stage::<CouponUsage>(
                &stream_for::<CouponUsage>(self.coupon_id),
                self.guard.version(),
                &[CouponEvent::CouponConsumed(record.clone())],
            )?;
        }
        Ok(())
    }

    /// Call only after the staged unit committed.
    pub(crate) fn apply(mut self) -> Option<CouponUsageRecord> {
        let record = self.planned.take()?;
        let next = self.guard.version().next();
        self.guard.apply(CouponEvent::CouponConsumed(record.clone()));
        self.guard.set_version(next);
        metrics::counter!("coupon_consumptions_total").increment(1);
        Some(record)
    }
}

/// Enforces global and per-customer coupon limits.
///
/// Each coupon has one lock; a consumption checks both limits and appends
/// its usage record while holding it.
pub struct CouponUsageTracker {
    store: Arc<dyn EventStore>,
    coupons: KeyedLocks<CouponId, CouponUsage>,
    codes: RwLock<HashMap<String, CouponId>>,
    config: DomainConfig,
}

impl CouponUsageTracker {
    pub fn new(store: Arc<dyn EventStore>, config: DomainConfig) -> Self {
        Self {
            store,
            coupons: KeyedLocks::new("coupon"),
            codes: RwLock::new(HashMap::new()),
            config,
        }
    }

    #[tracing::instrument(skip(self, coupon, actor), fields(coupon_id = %coupon.id, code = %coupon.code))]
    pub async fn register_coupon(&self, coupon: Coupon, actor: &Actor) -> Result<()> {
        let mut codes = self.codes.write().await;
        let code = normalize_code(&coupon.code);
        if codes.contains_key(&code) {
            return Err(CouponError::DuplicateCode(code).into());
        }

        let coupon_id = coupon.id;
        self.coupons.insert(coupon_id, CouponUsage::default()).await;
        let mut guard = self
            .coupons
            .lock(&coupon_id, self.config.lock_timeout)
            .await
            .map_err(coupon_lock_error)?;
        if guard.coupon().is_some() {
            return Err(CouponError::AlreadyRegistered(coupon_id).into());
        }

        let event = CouponEvent::CouponRegistered(CouponRegisteredData {
            coupon: Coupon { code: code.clone(), ..coupon },
            actor: actor.clone(),
            registered_at: Utc::now(),
        });
        let mut uow = UnitOfWork::new(actor);
        let head = uow.stage::<CouponUsage>(
            &stream_for::<CouponUsage>(coupon_id),
            guard.version(),
            std::slice::from_ref(&event),
        )?;
        uow.commit(self.store.as_ref()).await?;

        guard.apply(event);
        guard.set_version(head);
        codes.insert(code, coupon_id);
        Ok(())
    }

    /// Consumes one use for `customer`, or fails with `LimitExceeded`.
    pub async fn try_consume(
        &self,
        coupon_id: CouponId,
        customer: &CustomerKey,
        actor: &Actor,
    ) -> Result<CouponUsageRecord> {
        self.consume(coupon_id, customer, None, actor).await
    }

    #[tracing::instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn consume(
        &self,
        coupon_id: CouponId,
        customer: &CustomerKey,
        order_id: Option<OrderId>,
        actor: &Actor,
    ) -> Result<CouponUsageRecord> {
        let mut locked = self.lock_coupon(coupon_id).await?;
        locked.plan(customer, order_id, actor)?;

        let mut uow = UnitOfWork::new(actor);
        locked.stage(&mut uow)?;
        uow.commit(self.store.as_ref()).await?;

        let record = locked
            .apply()
            .ok_or(CouponError::NotFound(coupon_id))?;
        tracing::info!(%coupon_id, %customer, usage = record.usage_number, "coupon consumed");
        Ok(record)
    }

    #[tracing::instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn set_active(&self, coupon_id: CouponId, active: bool, actor: &Actor) -> Result<()> {
        let mut guard = self
            .coupons
            .lock(&coupon_id, self.config.lock_timeout)
            .await
            .map_err(coupon_lock_error)?;
        let current = guard.coupon().ok_or(CouponError::NotFound(coupon_id))?;
        if current.active == active {
            return Ok(());
        }

        let event = CouponEvent::CouponActivationChanged(CouponActivationChangedData {
            active,
            actor: actor.clone(),
            changed_at: Utc::now(),
        });
        let mut uow = UnitOfWork::new(actor);
        let head = uow.stage::<CouponUsage>(
            &stream_for::<CouponUsage>(coupon_id),
            guard.version(),
            std::slice::from_ref(&event),
        )?;
        uow.commit(self.store.as_ref()).await?;

        guard.apply(event);
        guard.set_version(head);
        Ok(())
    }

    pub async fn coupon(&self, coupon_id: CouponId) -> Result<Coupon> {
        let usage = self.usage(coupon_id).await?;
        usage
            .coupon()
            .cloned()
            .ok_or_else(|| CouponError::NotFound(coupon_id).into())
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let id = self.codes.read().await.get(&normalize_code(code)).copied();
        match id {
            Some(id) => Ok(Some(self.coupon(id).await?)),
            None => Ok(None),
        }
    }

    pub async fn times_used(&self, coupon_id: CouponId) -> Result<u32> {
        Ok(self.usage(coupon_id).await?.times_used())
    }

    pub async fn usage_count_for(&self, coupon_id: CouponId, customer: &CustomerKey) -> Result<u32> {
        Ok(self.usage(coupon_id).await?.usage_count_for(customer))
    }

    /// `None` when the coupon has no global limit.
    pub async fn usage_remaining(&self, coupon_id: CouponId) -> Result<Option<u32>> {
        Ok(self.usage(coupon_id).await?.usage_remaining())
    }

    pub async fn is_exhausted(&self, coupon_id: CouponId) -> Result<bool> {
        Ok(self.usage(coupon_id).await?.is_exhausted())
    }

    /// Advisory check at checkout. Returns the coupon and the discount it
    /// gives on `subtotal`. The binding check happens at confirm.
    #[tracing::instrument(skip(self))]
    pub async fn validate_for_checkout(
        &self,
        code: &str,
        customer: &CustomerKey,
        subtotal: Money,
    ) -> Result<(Coupon, Money)> {
        let coupon = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| CouponError::CodeNotFound(normalize_code(code)))?;
        coupon.check_applicable(subtotal, Utc::now())?;

        let usage = self.usage(coupon.id).await?;
        if usage.is_exhausted() {
            return Err(CouponError::LimitExceeded {
                coupon_id: coupon.id,
                scope: LimitScope::Global,
            }
            .into());
        }
        if coupon
            .per_user_limit
            .is_some_and(|limit| usage.usage_count_for(customer) >= limit)
        {
            return Err(CouponError::LimitExceeded {
                coupon_id: coupon.id,
                scope: LimitScope::PerCustomer,
            }
            .into());
        }

        let discount = coupon.discount_for(subtotal);
        Ok((coupon, discount))
    }

    /// Every usage record of a coupon, oldest first.
    pub async fn records(&self, coupon_id: CouponId) -> Result<Vec<CouponUsageRecord>> {
        let envelopes = self
            .store
            .read_stream(&stream_for::<CouponUsage>(coupon_id))
            .await?;
        let mut records = Vec::new();
        for envelope in envelopes {
            if let CouponEvent::CouponConsumed(record) = envelope.decode()? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Rebuilds coupon state and the code index from the journal.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let envelopes = self.store.read_category(CouponUsage::stream_type()).await?;
        let mut streams: BTreeMap<StreamId, Vec<EventEnvelope>> = BTreeMap::new();
        for envelope in envelopes {
            streams.entry(envelope.stream_id.clone()).or_default().push(envelope);
        }

        let mut restored = Vec::new();
        let mut codes = HashMap::new();
        for envelopes in streams.values() {
            let usage = CouponUsage::fold(envelopes)?;
            if let Some(coupon) = usage.coupon() {
                codes.insert(coupon.code.clone(), coupon.id);
                restored.push((coupon.id, usage));
            }
        }

        let count = restored.len();
        self.coupons.replace_all(restored).await;
        *self.codes.write().await = codes;
        tracing::info!(count, "coupon usage recovered");
        Ok(count)
    }

    async fn usage(&self, coupon_id: CouponId) -> Result<CouponUsage> {
        let usage = self
            .coupons
            .read(&coupon_id, self.config.lock_timeout)
            .await
            .map_err(coupon_lock_error)?;
        if usage.coupon().is_none() {
            return Err(CouponError::NotFound(coupon_id).into());
        }
        Ok(usage)
    }

    pub(crate) async fn lock_coupon(&self, coupon_id: CouponId) -> Result<LockedCoupon> {
        let guard = self
            .coupons
            .lock(&coupon_id, self.config.lock_timeout)
            .await
            .map_err(coupon_lock_error)?;
        if guard.coupon().is_none() {
            return Err(CouponError::NotFound(coupon_id).into());
        }
        Ok(LockedCoupon {
            coupon_id,
            guard,
            planned: None,
        })
    }
}
