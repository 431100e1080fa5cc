//! All-or-nothing stock commitment for order transitions.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::Actor;
use event_store::EventStore;

use crate::coupon::{CouponError, CouponUsageTracker};
use crate::error::{DomainError, Result};
use crate::inventory::{Adjustment, AdjustmentReason, InventoryError, LockedVariants, StockLedger};
use crate::unit_of_work::UnitOfWork;

use super::{
    Order, OrderEvent, OrderStatus, StatusChangedData, StockLine, TransitionCheck,
    TransitionRejectedData,
};

/// Commits an order's stock deductions, its coupon use and its status change
/// as one journal append.
///
/// Variants are always locked in ascending id order, and the coupon after
/// them, so two confirms touching overlapping variants cannot deadlock.
/// Callers are expected to hold the order exclusively; if they do not, the
/// order stream's expected version makes the commit fail instead.
pub struct ReservationCoordinator {
    store: Arc<dyn EventStore>,
    ledger: Arc<StockLedger>,
    coupons: Arc<CouponUsageTracker>,
}

impl ReservationCoordinator {
    pub fn new(
        store: Arc<dyn EventStore>,
        ledger: Arc<StockLedger>,
        coupons: Arc<CouponUsageTracker>,
    ) -> Self {
        Self {
            store,
            ledger,
            coupons,
        }
    }

    /// Moves `order` from `pending` to `confirmed`.
    ///
    /// Every tracked item is deducted (`order_confirm`) and the coupon, if any,
    /// is consumed. If any variant is short the result is `StockUnavailable`
    /// listing every short variant, and no quantity changes. A confirmed order
    /// is returned untouched.
    #[tracing::instrument(skip_all, fields(order_id = ?order.id(), actor = %actor))]
    pub async fn confirm(&self, order: &mut Order, actor: &Actor, notes: Option<String>) -> Result<()> {
        let order_id = order.order_id()?;
        if order.check_transition(OrderStatus::Confirmed)? == TransitionCheck::AlreadyApplied {
            return Ok(());
        }
        let started = Instant::now();

        let lines = order.tracked_lines()?;
        let mut variants = match self
            .ledger
            .lock_variants(lines.iter().map(|line| line.variant_id))
            .await
        {
            Ok(variants) => variants,
            Err(e) => return Err(self.refuse(order, actor, e).await),
        };

        let mut short = Vec::new();
        for line in &lines {
            let deduction = Adjustment::deduct(line.variant_id, line.quantity, AdjustmentReason::OrderConfirm)
                .reference(order_id.to_string());
            if let Err(e) = variants.plan(&deduction, actor) {
                match e.shortage() {
                    Some(shortage) => short.push(shortage),
                    None => return Err(e.into()),
                }
            }
        }

        if !short.is_empty() {
            drop(variants);
            let reason = short
                .iter()
                .map(|s| format!("variant {} short: requested {}, available {}", s.variant_id, s.requested, s.available))
                .collect::<Vec<_>>()
                .join("; ");
            self.record_rejection(order, OrderStatus::Confirmed, actor, reason).await;
            return Err(DomainError::StockUnavailable { short });
        }

        let customer = order.customer().cloned();
        let coupon = match (order.coupon_id(), order.coupon_consumed(), customer) {
            (Some(coupon_id), false, Some(customer)) => {
                let mut locked = match self.coupons.lock_coupon(coupon_id).await {
                    Ok(locked) => locked,
                    Err(e) => {
                        drop(variants);
                        return Err(self.refuse(order, actor, e).await);
                    }
                };
                if let Err(e) = locked.plan(&customer, Some(order_id), actor) {
                    if matches!(e, CouponError::LimitExceeded { .. }) {
                        drop(locked);
                        drop(variants);
                        self.record_rejection(order, OrderStatus::Confirmed, actor, e.to_string())
                            .await;
                    }
                    return Err(e.into());
                }
                Some(locked)
            }
            _ => None,
        };

        let mut change = StatusChangedData::new(OrderStatus::Pending, OrderStatus::Confirmed, actor, notes);
        change.committed = lines;
        change.coupon_consumed = coupon.is_some();
        let events = vec![OrderEvent::StatusChanged(change)];

        let mut uow = UnitOfWork::new(actor);
        variants.stage(&mut uow)?;
        if let Some(coupon) = &coupon {
            coupon.stage(&mut uow)?;
        }
        let head = order.stage(&mut uow, &events)?;
        uow.commit(self.store.as_ref()).await?;

        let entries = variants.apply();
        if let Some(coupon) = coupon {
            coupon.apply();
        }
        order.apply_committed(events, head);

        metrics::histogram!("order_confirm_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(%order_id, entries = entries.len(), "order confirmed");
        Ok(())
    }

    /// Returns `lines` to stock with `reason` and commits `change` together
    /// with the restock entries. `companions` are appended to the order stream
    /// ahead of the status change.
    #[tracing::instrument(skip_all, fields(order_id = ?order.id(), to = %change.to, reason = %reason))]
    pub async fn release(
        &self,
        order: &mut Order,
        mut change: StatusChangedData,
        reason: AdjustmentReason,
        lines: Vec<StockLine>,
        companions: Vec<OrderEvent>,
    ) -> Result<()> {
        let order_id = order.order_id()?;
        let actor = change.actor.clone();

        let mut variants: Option<LockedVariants> = None;
        if !lines.is_empty() {
            let mut locked = self
                .ledger
                .lock_variants(lines.iter().map(|line| line.variant_id))
                .await?;
            for line in &lines {
                let restock = Adjustment::restock(line.variant_id, line.quantity, reason)
                    .reference(order_id.to_string());
                locked.plan(&restock, &actor)?;
            }
            variants = Some(locked);
        }

        change.released = lines;
        let mut events = companions;
        events.push(OrderEvent::StatusChanged(change));

        let mut uow = UnitOfWork::new(&actor);
        if let Some(variants) = &variants {
            variants.stage(&mut uow)?;
        }
        let head = order.stage(&mut uow, &events)?;
        uow.commit(self.store.as_ref()).await?;

        let restocked = variants.map(LockedVariants::apply).unwrap_or_default();
        order.apply_committed(events, head);
        tracing::info!(%order_id, entries = restocked.len(), "order stock released");
        Ok(())
    }

    /// Logs a confirm that failed on a missing variant or coupon as a
    /// rejection. Timeouts and other errors pass through unlogged.
    async fn refuse(&self, order: &mut Order, actor: &Actor, err: DomainError) -> DomainError {
        let missing = matches!(
            err,
            DomainError::Inventory(InventoryError::VariantNotFound(_))
                | DomainError::Coupon(CouponError::NotFound(_))
        );
        if missing {
            self.record_rejection(order, OrderStatus::Confirmed, actor, err.to_string())
                .await;
        }
        err
    }

    /// Logs a refused legal transition on the order stream. A failure to log
    /// is reported but does not replace the refusal itself.
    async fn record_rejection(&self, order: &mut Order, to: OrderStatus, actor: &Actor, reason: String) {
        metrics::counter!("order_transitions_rejected_total", "to" => to.as_str()).increment(1);
        tracing::warn!(order_id = ?order.id(), from = %order.status(), %to, %reason, "transition rejected");

        let events = vec![OrderEvent::TransitionRejected(TransitionRejectedData {
            from: order.status(),
            to,
            actor: actor.clone(),
            reason,
            rejected_at: Utc::now(),
        })];
        let mut uow = UnitOfWork::new(actor);
        let committed = match order.stage(&mut uow, &events) {
            Ok(head) => uow.commit(self.store.as_ref()).await.map(|_| head),
            Err(e) => Err(e),
        };
        match committed {
            Ok(head) => order.apply_committed(events, head),
            Err(e) => tracing::warn!(error = %e, "failed to log rejected transition"),
        }
    }
}
