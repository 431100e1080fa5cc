//! The facade the presentation layer talks to.

use std::sync::Arc;

use common::{Actor, CustomerKey, OrderId, ReturnId, UserId, VariantId};
use domain::{
    Cart, CartError, CartService, Catalog, CouponUsageTracker, NewOrder, Order, OrderStateMachine,
    ReturnRequest, StockLedger, StockLine, StockSettings,
};
use event_store::{EventStore, InMemoryEventStore};
use projections::{ReconciliationReport, Reconciler};

use crate::checkout::{self, CheckoutRequest};
use crate::config::Config;
use crate::error::Result;
use crate::payment::{PaymentEvent, PaymentHandler};

/// Counts of aggregates rebuilt from the journal by [`CommerceEngine::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub variants: usize,
    pub coupons: usize,
    pub orders: usize,
}

/// Wires the domain services over one journal and exposes the operations
/// the API layer needs.
pub struct CommerceEngine {
    store: Arc<dyn EventStore>,
    catalog: Arc<dyn Catalog>,
    ledger: Arc<StockLedger>,
    coupons: Arc<CouponUsageTracker>,
    orders: Arc<OrderStateMachine>,
    carts: CartService,
    payments: PaymentHandler,
    config: Config,
}

impl CommerceEngine {
    pub fn new(store: Arc<dyn EventStore>, catalog: Arc<dyn Catalog>, config: Config) -> Self {
        let domain_config = config.domain_config();
        let ledger = Arc::new(StockLedger::new(Arc::clone(&store), domain_config.clone()));
        let coupons = Arc::new(CouponUsageTracker::new(Arc::clone(&store), domain_config.clone()));
        let orders = Arc::new(OrderStateMachine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&coupons),
            domain_config,
        ));
        Self {
            carts: CartService::new(Arc::clone(&catalog), Arc::clone(&ledger)),
            payments: PaymentHandler::new(Arc::clone(&orders)),
            store,
            catalog,
            ledger,
            coupons,
            orders,
            config,
        }
    }

    /// Engine over a fresh in-memory journal.
    pub fn in_memory(catalog: Arc<dyn Catalog>, config: Config) -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()), catalog, config)
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    pub fn coupons(&self) -> &Arc<CouponUsageTracker> {
        &self.coupons
    }

    pub fn orders(&self) -> &Arc<OrderStateMachine> {
        &self.orders
    }

    pub fn carts(&self) -> &CartService {
        &self.carts
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts tracking stock for a catalog variant, taking its backorder flag
    /// from the catalog and the low-stock threshold from configuration.
    #[tracing::instrument(skip(self, actor))]
    pub async fn register_variant(&self, variant_id: VariantId, initial_quantity: u32, actor: &Actor) -> Result<i64> {
        let variant = self
            .catalog
            .variant(variant_id)
            .await
            .ok_or_else(|| domain::DomainError::from(CartError::VariantNotFound(variant_id)))?;
        let settings =
            StockSettings::new(self.config.low_stock_threshold).with_backorder(variant.allow_backorder);
        Ok(self
            .ledger
            .register_variant(variant_id, settings, initial_quantity, actor)
            .await?)
    }

    /// Creates a `pending` order from the customer's cart and clears the cart.
    ///
    /// Prices and names are snapshotted from the catalog now. A coupon code is
    /// validated here but only consumed when the order is confirmed.
    #[tracing::instrument(skip(self, request, actor), fields(customer = %request.customer))]
    pub async fn checkout(&self, request: CheckoutRequest, actor: &Actor) -> Result<Order> {
        let cart = self
            .carts
            .cart(&request.customer)
            .await
            .ok_or_else(|| domain::DomainError::from(CartError::EmptyCart))?;
        let items = checkout::snapshot_items(&cart, self.catalog.as_ref()).await?;
        let subtotal = checkout::subtotal(&items);

        let mut new_order = NewOrder::new(request.customer.clone(), items)
            .shipping_fee(self.config.shipping_fee)
            .payment_method(request.payment_method);
        if let Some(code) = &request.coupon_code {
            let (coupon, discount) = self
                .coupons
                .validate_for_checkout(code, &request.customer, subtotal)
                .await?;
            new_order = new_order.coupon(coupon.id, discount);
        }

        let order = self.orders.place_order(new_order, actor).await?;
        self.carts.clear(&request.customer).await;

        metrics::counter!("checkouts_total").increment(1);
        tracing::info!(order_id = ?order.id(), total = %order.totals().total, "checkout complete");
        Ok(order)
    }

    /// `pending -> confirmed`: deducts every tracked item and consumes the
    /// coupon in one atomic unit, or changes nothing.
    pub async fn confirm_order(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        Ok(self.orders.confirm(order_id, actor).await?)
    }

    /// Cancels the order, restocking exactly what its confirm deducted.
    pub async fn cancel_order(&self, order_id: OrderId, reason: Option<String>, actor: &Actor) -> Result<Order> {
        Ok(self.orders.cancel(order_id, reason, actor).await?)
    }

    /// Opens a return on a delivered order. Empty `lines` returns the whole order.
    pub async fn request_return(
        &self,
        order_id: OrderId,
        lines: Vec<StockLine>,
        reason: &str,
        actor: &Actor,
    ) -> Result<ReturnRequest> {
        Ok(self.orders.request_return(order_id, lines, reason, actor).await?)
    }

    pub async fn approve_return(&self, return_id: ReturnId, actor: &Actor) -> Result<Order> {
        Ok(self.orders.approve_return(return_id, actor).await?)
    }

    pub async fn reject_return(&self, return_id: ReturnId, notes: Option<String>, actor: &Actor) -> Result<Order> {
        Ok(self.orders.reject_return(return_id, notes, actor).await?)
    }

    /// Goods received back; restocks the return lines.
    pub async fn complete_return(&self, return_id: ReturnId, actor: &Actor) -> Result<Order> {
        Ok(self.orders.complete_return(return_id, actor).await?)
    }

    /// Advisory availability read. May be stale by the time an order confirms.
    ///
    /// Untracked catalog variants are always available.
    pub async fn check_availability(&self, variant_id: VariantId, quantity: u32) -> Result<bool> {
        if let Some(variant) = self.catalog.variant(variant_id).await
            && !variant.track_inventory
        {
            return Ok(true);
        }
        Ok(self.ledger.check_availability(variant_id, quantity).await?)
    }

    /// Folds the guest cart into the user's cart and removes the guest cart.
    pub async fn merge_carts(&self, guest_key: &CustomerKey, user_id: UserId) -> Cart {
        self.carts.merge_carts(guest_key, user_id).await
    }

    pub async fn handle_payment(&self, event: &PaymentEvent) -> Result<Order> {
        self.payments.handle(event).await
    }

    /// Rebuilds ledger, coupon and order state from the journal.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryStats> {
        let stats = RecoveryStats {
            variants: self.ledger.recover().await?,
            coupons: self.coupons.recover().await?,
            orders: self.orders.recover().await?,
        };
        tracing::info!(?stats, "state recovered from journal");
        Ok(stats)
    }

    /// Replays the journal into fresh views and compares them with live state.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let reconciler = Reconciler::new(Arc::clone(&self.store), Arc::clone(&self.ledger));
        Ok(reconciler.run().await?)
    }
}
