//! Order status read model, one row per order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerKey, Money, OrderId};
use domain::{Aggregate, Order, OrderEvent, OrderStatus, PaymentMethod, PaymentStatus, ReturnStatus};
use event_store::{EventEnvelope, StreamId};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatusRow {
    pub order_id: OrderId,
    pub customer: CustomerKey,
    pub status: OrderStatus,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub return_status: Option<ReturnStatus>,
    /// Transitions refused by the coordinator, e.g. for lack of stock.
    pub rejected_attempts: u32,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct OrderStatusState {
    orders: HashMap<StreamId, OrderStatusRow>,
    position: ProjectionPosition,
}

/// Where every order currently stands, for listing and dashboards.
#[derive(Clone, Default)]
pub struct OrderStatusView {
    state: Arc<RwLock<OrderStatusState>>,
}

impl OrderStatusView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: OrderId) -> Option<OrderStatusRow> {
        let stream_id = StreamId::new(Order::stream_category(), order_id);
        self.state.read().await.orders.get(&stream_id).cloned()
    }

    pub async fn by_status(&self, status: OrderStatus) -> Vec<OrderStatusRow> {
        self.filtered(|row| row.status == status).await
    }

    pub async fn for_customer(&self, customer: &CustomerKey) -> Vec<OrderStatusRow> {
        self.filtered(|row| &row.customer == customer).await
    }

    /// Orders that have not reached a terminal status.
    pub async fn active(&self) -> Vec<OrderStatusRow> {
        self.filtered(|row| !row.status.is_terminal()).await
    }

    pub async fn counts_by_status(&self) -> BTreeMap<OrderStatus, usize> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for row in state.orders.values() {
            *counts.entry(row.status).or_default() += 1;
        }
        counts
    }

    async fn filtered(&self, keep: impl Fn(&OrderStatusRow) -> bool) -> Vec<OrderStatusRow> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state.orders.values().filter(|r| keep(r)).cloned().collect();
        rows.sort_by_key(|r| r.placed_at);
        rows
    }
}

#[async_trait]
impl Projection for OrderStatusView {
    fn name(&self) -> &'static str {
        "OrderStatusView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance(event);
        if event.stream_type != Order::stream_type() {
            return Ok(());
        }

        let order_event: OrderEvent = event.decode()?;
        if let OrderEvent::OrderPlaced(data) = &order_event {
            state.orders.insert(
                event.stream_id.clone(),
                OrderStatusRow {
                    order_id: data.order_id,
                    customer: data.customer.clone(),
                    status: OrderStatus::Pending,
                    total: data.totals.total,
                    payment_method: data.payment_method,
                    payment_status: PaymentStatus::Unpaid,
                    return_status: None,
                    rejected_attempts: 0,
                    placed_at: data.placed_at,
                    updated_at: data.placed_at,
                },
            );
            return Ok(());
        }

        let Some(row) = state.orders.get_mut(&event.stream_id) else {
            tracing::warn!(stream_id = %event.stream_id, "order event before OrderPlaced");
            return Ok(());
        };
        row.updated_at = event.timestamp;
        match order_event {
            OrderEvent::OrderPlaced(_) => {}
            OrderEvent::StatusChanged(data) => {
                row.status = data.to;
                if data.to == OrderStatus::Refunded && row.payment_status == PaymentStatus::Paid {
                    row.payment_status = PaymentStatus::Refunded;
                }
            }
            OrderEvent::TransitionRejected(_) => row.rejected_attempts += 1,
            OrderEvent::ReturnRequested(request) => row.return_status = Some(request.status),
            OrderEvent::ReturnResolved(data) => row.return_status = Some(data.status),
            OrderEvent::PaymentRecorded(data) => row.payment_status = data.status,
        }
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = OrderStatusState::default();
        Ok(())
    }
}

impl ReadModel for OrderStatusView {
    fn name(&self) -> &'static str {
        "OrderStatusView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.orders.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Actor, VariantId};
    use domain::order::{OrderPlacedData, StatusChangedData, TransitionRejectedData};
    use domain::{DomainEvent, OrderItem, OrderTotals};
    use event_store::Version;

    fn envelope(order_id: OrderId, version: i64, event: &OrderEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .stream_id(StreamId::new("order", order_id))
            .stream_type("Order")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    fn placed(order_id: OrderId, customer: &str) -> OrderEvent {
        let items = vec![OrderItem::new(VariantId::new(1), "SKU-1", "Mug", Money::from_cents(1200), 2)];
        let totals = OrderTotals::compute(&items, Money::zero(), Money::from_cents(300));
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            customer: CustomerKey::guest(customer),
            items,
            totals,
            coupon_id: None,
            payment_method: PaymentMethod::Online,
            actor: Actor::system(),
            placed_at: Utc::now(),
        })
    }

    fn changed(from: OrderStatus, to: OrderStatus) -> OrderEvent {
        OrderEvent::StatusChanged(StatusChangedData::new(from, to, &Actor::system(), None))
    }

    #[tokio::test]
    async fn tracks_status_and_payment() {
        let view = OrderStatusView::new();
        let order_id = OrderId::new();
        let events = [
            placed(order_id, "a"),
            changed(OrderStatus::Pending, OrderStatus::Confirmed),
            OrderEvent::PaymentRecorded(domain::order::PaymentRecordedData {
                status: PaymentStatus::Paid,
                reference: Some("txn-1".into()),
                actor: Actor::system(),
                recorded_at: Utc::now(),
            }),
            changed(OrderStatus::Confirmed, OrderStatus::Refunded),
        ];
        for (n, event) in events.iter().enumerate() {
            view.handle(&envelope(order_id, n as i64 + 1, event)).await.unwrap();
        }

        let row = view.get(order_id).await.unwrap();
        assert_eq!(row.status, OrderStatus::Refunded);
        assert_eq!(row.payment_status, PaymentStatus::Refunded);
        assert_eq!(row.total, Money::from_cents(2700));
        assert!(view.active().await.is_empty());
    }

    #[tokio::test]
    async fn counts_rejections_and_groups_by_status() {
        let view = OrderStatusView::new();
        let first = OrderId::new();
        let second = OrderId::new();
        view.handle(&envelope(first, 1, &placed(first, "a"))).await.unwrap();
        view.handle(&envelope(second, 1, &placed(second, "b"))).await.unwrap();
        let rejected = OrderEvent::TransitionRejected(TransitionRejectedData {
            from: OrderStatus::Pending,
            to: OrderStatus::Confirmed,
            actor: Actor::system(),
            reason: "insufficient stock".into(),
            rejected_at: Utc::now(),
        });
        view.handle(&envelope(first, 2, &rejected)).await.unwrap();
        view.handle(&envelope(second, 2, &changed(OrderStatus::Pending, OrderStatus::Confirmed)))
            .await
            .unwrap();

        assert_eq!(view.get(first).await.unwrap().rejected_attempts, 1);
        let counts = view.counts_by_status().await;
        assert_eq!(counts[&OrderStatus::Pending], 1);
        assert_eq!(counts[&OrderStatus::Confirmed], 1);
        assert_eq!(view.for_customer(&CustomerKey::guest("b")).await.len(), 1);
        assert_eq!(ReadModel::count(&view), 2);
    }

    #[tokio::test]
    async fn orphan_events_are_skipped() {
        let view = OrderStatusView::new();
        let order_id = OrderId::new();
        view.handle(&envelope(order_id, 1, &changed(OrderStatus::Pending, OrderStatus::Confirmed)))
            .await
            .unwrap();

        assert!(view.get(order_id).await.is_none());
        assert_eq!(view.position().await.events_processed, 1);
    }
}
