//! Order aggregate implementation.

use std::collections::BTreeMap;

use common::{CouponId, CustomerKey, OrderId, VariantId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::unit_of_work::{UnitOfWork, stream_for};

use super::{
    Milestones, OrderError, OrderEvent, OrderItem, OrderStatus, OrderTotals, PaymentMethod,
    PaymentStatus, ReturnRequest, StockEffect, StockLine,
};

/// Outcome of checking a requested transition against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// The order is already in the requested status; nothing to do.
    AlreadyApplied,
    Allowed(StockEffect),
}

/// Order aggregate root.
///
/// The status only moves through [`OrderStatus`] edges, and only by applying
/// events from the order's own stream.
#[derive(Debug, Clone, Default)]
pub struct Order {
    id: Option<OrderId>,
    version: Version,
    customer: Option<CustomerKey>,
    status: OrderStatus,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    coupon_id: Option<CouponId>,
    coupon_consumed: bool,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    /// Stock currently deducted on behalf of this order, per variant.
    committed: BTreeMap<VariantId, u32>,
    return_request: Option<ReturnRequest>,
    milestones: Milestones,
    rejected_attempts: u32,
}

impl Aggregate for Order {
    type Event = OrderEvent;

    fn stream_type() -> &'static str {
        "Order"
    }

    fn stream_category() -> &'static str {
        "order"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => {
                self.id = Some(data.order_id);
                self.customer = Some(data.customer);
                self.items = data.items;
                self.totals = data.totals;
                self.coupon_id = data.coupon_id;
                self.payment_method = data.payment_method;
                self.status = OrderStatus::Pending;
                self.milestones.placed_at = Some(data.placed_at);
            }
            OrderEvent::StatusChanged(data) => {
                for line in data.committed {
                    let held = self.committed.entry(line.variant_id).or_default();
                    *held = held.saturating_add(line.quantity);
                }
                for line in data.released {
                    if let Some(held) = self.committed.get_mut(&line.variant_id) {
                        *held = held.saturating_sub(line.quantity);
                    }
                }
                self.committed.retain(|_, quantity| *quantity > 0);

                self.coupon_consumed |= data.coupon_consumed;
                if data.to == OrderStatus::Refunded && self.payment_status == PaymentStatus::Paid {
                    self.payment_status = PaymentStatus::Refunded;
                }
                self.status = data.to;
                self.milestones.record(data.to, data.changed_at);
            }
            OrderEvent::TransitionRejected(_) => {
                self.rejected_attempts += 1;
            }
            OrderEvent::ReturnRequested(request) => {
                self.return_request = Some(request);
            }
            OrderEvent::ReturnResolved(data) => {
                if let Some(request) = self.return_request.as_mut()
                    && request.id == data.return_id
                {
                    request.status = data.status;
                    request.notes = data.notes;
                    request.resolved_at = Some(data.resolved_at);
                }
            }
            OrderEvent::PaymentRecorded(data) => {
                self.payment_status = data.status;
            }
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> Option<OrderId> {
        self.id
    }

    /// The order id, or `NotPlaced` for an empty aggregate.
    pub fn order_id(&self) -> Result<OrderId, OrderError> {
        self.id.ok_or(OrderError::NotPlaced)
    }

    pub fn customer(&self) -> Option<&CustomerKey> {
        self.customer.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn coupon_id(&self) -> Option<CouponId> {
        self.coupon_id
    }

    /// True once the coupon's usage was recorded for this order.
    pub fn coupon_consumed(&self) -> bool {
        self.coupon_consumed
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn return_request(&self) -> Option<&ReturnRequest> {
        self.return_request.as_ref()
    }

    pub fn milestones(&self) -> &Milestones {
        &self.milestones
    }

    /// Number of legal transitions that were refused, e.g. confirms short of stock.
    pub fn rejected_attempts(&self) -> u32 {
        self.rejected_attempts
    }

    /// Stock currently deducted for this order, in variant order.
    pub fn committed_lines(&self) -> Vec<StockLine> {
        self.committed
            .iter()
            .map(|(variant_id, quantity)| StockLine::new(*variant_id, *quantity))
            .collect()
    }

    pub fn has_committed_stock(&self) -> bool {
        !self.committed.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Checks `to` against the status graph.
    pub fn check_transition(&self, to: OrderStatus) -> Result<TransitionCheck, OrderError> {
        self.order_id()?;
        if self.status == to {
            return Ok(TransitionCheck::AlreadyApplied);
        }
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(TransitionCheck::Allowed(self.status.stock_effect(to)))
    }

    /// Quantities a confirm must deduct: tracked items merged per variant,
    /// in ascending variant order.
    pub fn tracked_lines(&self) -> Result<Vec<StockLine>, OrderError> {
        let merged = sum_by_variant(
            self.items
                .iter()
                .filter(|i| i.track_inventory)
                .map(|i| (i.variant_id, i.quantity)),
        )?;
        Ok(merged
            .into_iter()
            .map(|(variant_id, quantity)| StockLine::new(variant_id, quantity))
            .collect())
    }

    /// The part of `scope` that is still committed. `None` means everything.
    pub fn releasable(&self, scope: Option<&[StockLine]>) -> Vec<StockLine> {
        let Some(scope) = scope else {
            return self.committed_lines();
        };

        let mut wanted: BTreeMap<VariantId, u32> = BTreeMap::new();
        for line in scope {
            let quantity = wanted.entry(line.variant_id).or_default();
            *quantity = quantity.saturating_add(line.quantity);
        }
        wanted
            .into_iter()
            .filter_map(|(variant_id, quantity)| {
                let held = self.committed.get(&variant_id).copied().unwrap_or(0);
                let quantity = quantity.min(held);
                (quantity > 0).then(|| StockLine::new(variant_id, quantity))
            })
            .collect()
    }

    /// Normalizes requested return lines. An empty request returns the whole
    /// order; otherwise each variant must be part of the order and may not
    /// exceed the ordered quantity.
    pub fn validate_return_lines(&self, lines: &[StockLine]) -> Result<Vec<StockLine>, OrderError> {
        let ordered = sum_by_variant(self.items.iter().map(|i| (i.variant_id, i.quantity)))?;

        if lines.is_empty() {
            return Ok(ordered
                .into_iter()
                .map(|(variant_id, quantity)| StockLine::new(variant_id, quantity))
                .collect());
        }

        if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                variant_id: line.variant_id,
                quantity: line.quantity,
            });
        }
        let requested = sum_by_variant(lines.iter().map(|l| (l.variant_id, l.quantity)))?;

        for (variant_id, quantity) in &requested {
            match ordered.get(variant_id) {
                None => {
                    return Err(OrderError::InvalidReturnLine {
                        variant_id: *variant_id,
                        reason: "variant is not part of the order".to_string(),
                    });
                }
                Some(limit) if quantity > limit => {
                    return Err(OrderError::InvalidReturnLine {
                        variant_id: *variant_id,
                        reason: format!("returning {quantity} of {limit} ordered"),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(requested
            .into_iter()
            .map(|(variant_id, quantity)| StockLine::new(variant_id, quantity))
            .collect())
    }
}

/// Totals quantities per variant. A total past `u32::MAX` is an
/// `InvalidQuantity` for that variant.
pub(crate) fn sum_by_variant(
    lines: impl IntoIterator<Item = (VariantId, u32)>,
) -> Result<BTreeMap<VariantId, u32>, OrderError> {
    let mut totals: BTreeMap<VariantId, u32> = BTreeMap::new();
    for (variant_id, quantity) in lines {
        let total = totals.entry(variant_id).or_default();
        *total = total
            .checked_add(quantity)
            .ok_or(OrderError::InvalidQuantity { variant_id, quantity })?;
    }
    Ok(totals)
}

// Journal plumbing
impl Order {
    /// Stages `events` on this order's stream at its current version.
    pub(crate) fn stage(&self, uow: &mut UnitOfWork, events: &[OrderEvent]) -> Result<Version, DomainError> {
        let id = self.order_id()?;
        uow.stage::<Order>(&stream_for::<Order>(id), self.version, events)
    }

    /// Applies events that were just committed, ending at `head`.
    pub(crate) fn apply_committed(&mut self, events: Vec<OrderEvent>, head: Version) {
        self.apply_events(events);
        self.set_version(head);
    }
}
