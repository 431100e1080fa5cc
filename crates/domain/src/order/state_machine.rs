//! The only path by which an order's status changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use common::{Actor, CouponId, CustomerKey, Money, OrderId, ReturnId, VariantId};
use event_store::{EventEnvelope, EventStore, EventStoreExt, StreamId, Version};
use tokio::sync::RwLock;

use crate::aggregate::Aggregate;
use crate::config::DomainConfig;
use crate::coupon::CouponUsageTracker;
use crate::error::{DomainError, Result};
use crate::inventory::StockLedger;
use crate::locks::{KeyedLocks, LockError, SlotGuard};
use crate::unit_of_work::{UnitOfWork, stream_for};

use super::{
    Order, OrderError, OrderEvent, OrderItem, OrderPlacedData, OrderStatus, OrderTotals,
    PaymentMethod, PaymentRecordedData, PaymentStatus, ReservationCoordinator, ReturnRequest,
    ReturnResolvedData, ReturnStatus, StatusChangedData, StatusLogEntry, StockEffect, StockLine,
    TransitionCheck, TransitionOutcome, record_transition,
};

fn order_lock_error(err: LockError<OrderId>) -> DomainError {
    err.or_missing(|id| OrderError::NotFound(id).into())
}

/// Input for [`OrderStateMachine::place_order`].
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer: CustomerKey,
    pub items: Vec<OrderItem>,
    pub coupon_id: Option<CouponId>,
    /// Discount granted by the coupon, already computed.
    pub discount: Money,
    pub shipping_fee: Money,
    pub payment_method: PaymentMethod,
}

impl NewOrder {
    pub fn new(customer: CustomerKey, items: Vec<OrderItem>) -> Self {
        Self {
            customer,
            items,
            coupon_id: None,
            discount: Money::zero(),
            shipping_fee: Money::zero(),
            payment_method: PaymentMethod::default(),
        }
    }

    pub fn coupon(mut self, coupon_id: CouponId, discount: Money) -> Self {
        self.coupon_id = Some(coupon_id);
        self.discount = discount;
        self
    }

    pub fn shipping_fee(mut self, fee: Money) -> Self {
        self.shipping_fee = fee;
        self
    }

    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }
}

/// What a return-path transition carries besides the status change.
struct ReturnDraft {
    lines: Vec<StockLine>,
    reason: String,
}

/// Enforces the order status graph.
///
/// Each order has one lock, so at most one transition runs per order at a
/// time. Stock and coupon side effects of an edge are committed in the same
/// journal append as the status change, through the
/// [`ReservationCoordinator`].
pub struct OrderStateMachine {
    store: Arc<dyn EventStore>,
    orders: KeyedLocks<OrderId, Order>,
    returns: RwLock<HashMap<ReturnId, OrderId>>,
    coordinator: ReservationCoordinator,
    config: DomainConfig,
}

impl OrderStateMachine {
    pub fn new(
        store: Arc<dyn EventStore>,
        ledger: Arc<StockLedger>,
        coupons: Arc<CouponUsageTracker>,
        config: DomainConfig,
    ) -> Self {
        Self {
            coordinator: ReservationCoordinator::new(store.clone(), ledger, coupons),
            store,
            orders: KeyedLocks::new("order"),
            returns: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Records a new order in `pending`. Items for the same variant are merged.
    #[tracing::instrument(skip(self, new_order, actor), fields(customer = %new_order.customer, actor = %actor))]
    pub async fn place_order(&self, new_order: NewOrder, actor: &Actor) -> Result<Order> {
        let items = merge_items(new_order.items)?;
        let totals = OrderTotals::compute(&items, new_order.discount, new_order.shipping_fee);
        let order_id = OrderId::new();

        let events = vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            customer: new_order.customer,
            items,
            totals,
            coupon_id: new_order.coupon_id,
            payment_method: new_order.payment_method,
            actor: actor.clone(),
            placed_at: Utc::now(),
        })];

        let mut uow = UnitOfWork::new(actor);
        let head = uow.stage::<Order>(&stream_for::<Order>(order_id), Version::initial(), &events)?;
        uow.commit(self.store.as_ref()).await?;

        let mut order = Order::default();
        order.apply_committed(events, head);
        self.orders.insert(order_id, order.clone()).await;

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(%order_id, total = %totals.total, "order placed");
        Ok(order)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .read(&order_id, self.config.lock_timeout)
            .await
            .map_err(order_lock_error)
    }

    pub async fn order_ids(&self) -> Vec<OrderId> {
        self.orders.keys().await
    }

    /// Applies a transition along the status graph.
    ///
    /// Requesting the current status is a successful no-op. An illegal edge
    /// fails with `InvalidTransition` and leaves no trace.
    #[tracing::instrument(skip(self, actor, notes), fields(actor = %actor))]
    pub async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<Order> {
        let mut order = self.lock(order_id).await?;
        self.apply_transition(&mut order, to, actor, notes, None).await?;
        Ok(order.clone())
    }

    /// `pending -> confirmed`, deducting every tracked item atomically.
    pub async fn confirm(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        self.transition(order_id, OrderStatus::Confirmed, actor, None).await
    }

    /// Cancels the order, restocking whatever was committed for it.
    pub async fn cancel(&self, order_id: OrderId, reason: Option<String>, actor: &Actor) -> Result<Order> {
        self.transition(order_id, OrderStatus::Cancelled, actor, reason).await
    }

    /// Opens a return for a delivered order. Empty `lines` returns everything.
    #[tracing::instrument(skip(self, lines, actor), fields(actor = %actor))]
    pub async fn request_return(
        &self,
        order_id: OrderId,
        lines: Vec<StockLine>,
        reason: impl Into<String> + std::fmt::Debug,
        actor: &Actor,
    ) -> Result<ReturnRequest> {
        let mut order = self.lock(order_id).await?;
        let draft = ReturnDraft {
            lines,
            reason: reason.into(),
        };
        self.apply_transition(&mut order, OrderStatus::ReturnRequested, actor, None, Some(draft))
            .await?;

        let request = order
            .return_request()
            .cloned()
            .ok_or(OrderError::InvalidTransition {
                from: order.status(),
                to: OrderStatus::ReturnRequested,
            })?;
        self.returns.write().await.insert(request.id, order_id);
        Ok(request)
    }

    pub async fn approve_return(&self, return_id: ReturnId, actor: &Actor) -> Result<Order> {
        let order_id = self.order_for_return(return_id).await?;
        self.transition(order_id, OrderStatus::ReturnApproved, actor, None).await
    }

    pub async fn reject_return(&self, return_id: ReturnId, notes: Option<String>, actor: &Actor) -> Result<Order> {
        let order_id = self.order_for_return(return_id).await?;
        self.transition(order_id, OrderStatus::ReturnRejected, actor, notes).await
    }

    /// Goods received: `return_approved -> returned`, restocking the return lines.
    pub async fn complete_return(&self, return_id: ReturnId, actor: &Actor) -> Result<Order> {
        let order_id = self.order_for_return(return_id).await?;
        self.transition(order_id, OrderStatus::Returned, actor, None).await
    }

    pub async fn return_request(&self, return_id: ReturnId) -> Result<ReturnRequest> {
        let order_id = self.order_for_return(return_id).await?;
        self.order(order_id)
            .await?
            .return_request()
            .filter(|r| r.id == return_id)
            .cloned()
            .ok_or_else(|| OrderError::ReturnNotFound(return_id).into())
    }

    /// Records a payment status change. Recording the current status again
    /// is a no-op.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn record_payment(
        &self,
        order_id: OrderId,
        status: PaymentStatus,
        reference: Option<String>,
        actor: &Actor,
    ) -> Result<Order> {
        let mut order = self.lock(order_id).await?;
        if order.payment_status() == status {
            return Ok(order.clone());
        }

        let events = vec![OrderEvent::PaymentRecorded(PaymentRecordedData {
            status,
            reference,
            actor: actor.clone(),
            recorded_at: Utc::now(),
        })];
        let mut uow = UnitOfWork::new(actor);
        let head = order.stage(&mut uow, &events)?;
        uow.commit(self.store.as_ref()).await?;
        order.apply_committed(events, head);

        tracing::info!(%order_id, ?status, "payment recorded");
        Ok(order.clone())
    }

    /// The order's status log, oldest first, read from the journal.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<StatusLogEntry>> {
        let envelopes = self.store.read_stream(&stream_for::<Order>(order_id)).await?;
        if envelopes.is_empty() {
            return Err(OrderError::NotFound(order_id).into());
        }

        let mut log = Vec::new();
        for envelope in envelopes {
            match envelope.decode::<OrderEvent>()? {
                OrderEvent::StatusChanged(data) => log.push(StatusLogEntry {
                    order_id,
                    from: data.from,
                    to: data.to,
                    actor: data.actor,
                    notes: data.notes,
                    outcome: TransitionOutcome::Applied,
                    at: data.changed_at,
                }),
                OrderEvent::TransitionRejected(data) => log.push(StatusLogEntry {
                    order_id,
                    from: data.from,
                    to: data.to,
                    actor: data.actor,
                    notes: None,
                    outcome: TransitionOutcome::Rejected { reason: data.reason },
                    at: data.rejected_at,
                }),
                _ => {}
            }
        }
        Ok(log)
    }

    /// Rebuilds every order and the return index from the journal.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let envelopes = self.store.read_category(Order::stream_type()).await?;
        let mut streams: BTreeMap<StreamId, Vec<EventEnvelope>> = BTreeMap::new();
        for envelope in envelopes {
            streams.entry(envelope.stream_id.clone()).or_default().push(envelope);
        }

        let mut restored = Vec::with_capacity(streams.len());
        let mut returns = HashMap::new();
        for envelopes in streams.values() {
            let order = Order::fold(envelopes)?;
            if let Some(order_id) = order.id() {
                if let Some(request) = order.return_request() {
                    returns.insert(request.id, order_id);
                }
                restored.push((order_id, order));
            }
        }

        let count = restored.len();
        self.orders.replace_all(restored).await;
        *self.returns.write().await = returns;
        tracing::info!(count, "orders recovered");
        Ok(count)
    }

    async fn lock(&self, order_id: OrderId) -> Result<SlotGuard<Order>> {
        self.orders
            .lock(&order_id, self.config.lock_timeout)
            .await
            .map_err(order_lock_error)
    }

    async fn order_for_return(&self, return_id: ReturnId) -> Result<OrderId> {
        self.returns
            .read()
            .await
            .get(&return_id)
            .copied()
            .ok_or_else(|| OrderError::ReturnNotFound(return_id).into())
    }

    async fn apply_transition(
        &self,
        order: &mut Order,
        to: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
        draft: Option<ReturnDraft>,
    ) -> Result<()> {
        let order_id = order.order_id()?;
        let from = order.status();
        let effect = match order.check_transition(to)? {
            TransitionCheck::AlreadyApplied => {
                tracing::debug!(%order_id, status = %to, "transition already applied");
                return Ok(());
            }
            TransitionCheck::Allowed(effect) => effect,
        };

        if effect == StockEffect::Deduct {
            self.coordinator.confirm(order, actor, notes).await?;
            record_transition(from, to);
            return Ok(());
        }

        let now = Utc::now();
        let mut companions = Vec::new();
        let mut restock_scope = None;
        match to {
            OrderStatus::ReturnRequested => {
                let draft = draft.unwrap_or_else(|| ReturnDraft {
                    lines: Vec::new(),
                    reason: notes.clone().unwrap_or_default(),
                });
                let lines = order.validate_return_lines(&draft.lines)?;
                companions.push(OrderEvent::ReturnRequested(ReturnRequest {
                    id: ReturnId::new(),
                    order_id,
                    lines,
                    reason: draft.reason,
                    status: ReturnStatus::Requested,
                    notes: None,
                    requested_at: now,
                    resolved_at: None,
                }));
            }
            OrderStatus::ReturnApproved | OrderStatus::ReturnRejected => {
                if let Some(request) = order.return_request() {
                    let status = if to == OrderStatus::ReturnApproved {
                        ReturnStatus::Approved
                    } else {
                        ReturnStatus::Rejected
                    };
                    companions.push(resolution(request.id, status, actor, notes.clone()));
                }
            }
            OrderStatus::Returned if from == OrderStatus::ReturnApproved => {
                if let Some(request) = order.return_request() {
                    companions.push(resolution(request.id, ReturnStatus::Completed, actor, notes.clone()));
                    restock_scope = Some(request.lines.clone());
                }
            }
            _ => {}
        }

        let change = StatusChangedData::new(from, to, actor, notes);
        match effect {
            StockEffect::Restock(reason) => {
                let lines = order.releasable(restock_scope.as_deref());
                self.coordinator
                    .release(order, change, reason, lines, companions)
                    .await?;
            }
            _ => {
                let mut events = companions;
                events.push(OrderEvent::StatusChanged(change));
                let mut uow = UnitOfWork::new(actor);
                let head = order.stage(&mut uow, &events)?;
                uow.commit(self.store.as_ref()).await?;
                order.apply_committed(events, head);
            }
        }

        record_transition(from, to);
        tracing::info!(%order_id, %from, %to, "order status changed");
        Ok(())
    }
}

fn resolution(return_id: ReturnId, status: ReturnStatus, actor: &Actor, notes: Option<String>) -> OrderEvent {
    OrderEvent::ReturnResolved(ReturnResolvedData {
        return_id,
        status,
        actor: actor.clone(),
        notes,
        resolved_at: Utc::now(),
    })
}

/// Rejects empty orders and zero quantities, and merges lines per variant
/// keeping the first snapshot's price and name.
fn merge_items(items: Vec<OrderItem>) -> Result<Vec<OrderItem>, OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyOrder);
    }

    let mut merged: Vec<OrderItem> = Vec::with_capacity(items.len());
    let mut index: HashMap<VariantId, usize> = HashMap::new();
    for item in items {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                variant_id: item.variant_id,
                quantity: 0,
            });
        }
        match index.get(&item.variant_id) {
            Some(&position) => {
                let line = &mut merged[position];
                line.quantity = line
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or(OrderError::InvalidQuantity {
                        variant_id: item.variant_id,
                        quantity: item.quantity,
                    })?;
            }
            None => {
                index.insert(item.variant_id, merged.len());
                merged.push(item);
            }
        }
    }
    Ok(merged)
}
