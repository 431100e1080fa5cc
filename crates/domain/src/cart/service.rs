use std::collections::HashMap;
use std::sync::Arc;

use common::{CustomerKey, Money, UserId, VariantId};
use tokio::sync::RwLock;

use crate::catalog::{Catalog, CatalogVariant};
use crate::error::Result;
use crate::inventory::StockLedger;

use super::{Cart, CartError, CartValidation, PriceChange};

/// Price drift, in percent, that `validate` reports.
const PRICE_DRIFT_PERCENT: i64 = 10;

/// Keeps one cart per guest session or user.
///
/// Availability checks are advisory. The ledger is only read, never written,
/// and nothing here reserves stock.
pub struct CartService {
    carts: RwLock<HashMap<CustomerKey, Cart>>,
    catalog: Arc<dyn Catalog>,
    ledger: Arc<StockLedger>,
}

impl CartService {
    pub fn new(catalog: Arc<dyn Catalog>, ledger: Arc<StockLedger>) -> Self {
        Self {
            carts: RwLock::new(HashMap::new()),
            catalog,
            ledger,
        }
    }

    pub async fn get_or_create(&self, owner: &CustomerKey) -> Cart {
        self.carts
            .write()
            .await
            .entry(owner.clone())
            .or_insert_with(|| Cart::new(owner.clone()))
            .clone()
    }

    pub async fn cart(&self, owner: &CustomerKey) -> Option<Cart> {
        self.carts.read().await.get(owner).cloned()
    }

    /// Adds `quantity` to the variant's line, creating the cart if needed.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, owner: &CustomerKey, variant_id: VariantId, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity { variant_id, quantity }.into());
        }
        let variant = self.sellable(variant_id).await?;

        // The advisory check runs without the cart map locked; the sum is
        // recomputed under the lock so concurrent adds are not lost.
        let held = self
            .carts
            .read()
            .await
            .get(owner)
            .map_or(0, |cart| cart.quantity_of(variant_id));
        self.ensure_available(&variant, added(variant_id, held, quantity)?)
            .await?;

        let mut carts = self.carts.write().await;
        let cart = carts
            .entry(owner.clone())
            .or_insert_with(|| Cart::new(owner.clone()));
        let wanted = added(variant_id, cart.quantity_of(variant_id), quantity)?;
        cart.set_line(variant_id, wanted, variant.price);
        Ok(cart.clone())
    }

    /// Replaces a line's quantity and refreshes its price.
    #[tracing::instrument(skip(self))]
    pub async fn update_item(&self, owner: &CustomerKey, variant_id: VariantId, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity { variant_id, quantity }.into());
        }
        let variant = self.sellable(variant_id).await?;
        self.line_exists(owner, variant_id).await?;
        self.ensure_available(&variant, quantity).await?;

        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner)
            .ok_or_else(|| CartError::CartNotFound(owner.clone()))?;
        if cart.line(variant_id).is_none() {
            return Err(CartError::ItemNotFound(variant_id).into());
        }
        cart.set_line(variant_id, quantity, variant.price);
        Ok(cart.clone())
    }

    async fn line_exists(&self, owner: &CustomerKey, variant_id: VariantId) -> Result<()> {
        let carts = self.carts.read().await;
        let cart = carts
            .get(owner)
            .ok_or_else(|| CartError::CartNotFound(owner.clone()))?;
        if cart.line(variant_id).is_none() {
            return Err(CartError::ItemNotFound(variant_id).into());
        }
        Ok(())
    }

    pub async fn remove_item(&self, owner: &CustomerKey, variant_id: VariantId) -> Result<Cart> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner)
            .ok_or_else(|| CartError::CartNotFound(owner.clone()))?;
        if !cart.remove_line(variant_id) {
            return Err(CartError::ItemNotFound(variant_id).into());
        }
        Ok(cart.clone())
    }

    pub async fn clear(&self, owner: &CustomerKey) {
        if let Some(cart) = self.carts.write().await.get_mut(owner) {
            cart.clear();
        }
    }

    pub async fn subtotal(&self, owner: &CustomerKey) -> Money {
        self.carts
            .read()
            .await
            .get(owner)
            .map(Cart::subtotal)
            .unwrap_or_default()
    }

    /// Folds the guest cart into the user's cart on login and discards it.
    ///
    /// Shared variants keep the larger quantity. No stock is checked or held.
    #[tracing::instrument(skip(self))]
    pub async fn merge_carts(&self, guest_key: &CustomerKey, user_id: UserId) -> Cart {
        let user_key = CustomerKey::User(user_id);
        let mut carts = self.carts.write().await;
        let guest = carts.remove(guest_key);
        let cart = carts
            .entry(user_key.clone())
            .or_insert_with(|| Cart::new(user_key));
        if let Some(guest) = guest {
            let merged = guest.lines.len();
            cart.absorb(guest);
            tracing::info!(merged, "guest cart merged");
        }
        cart.clone()
    }

    /// Checks every line against the live catalog and ledger.
    #[tracing::instrument(skip(self))]
    pub async fn validate(&self, owner: &CustomerKey) -> Result<CartValidation> {
        let cart = self
            .cart(owner)
            .await
            .ok_or_else(|| CartError::CartNotFound(owner.clone()))?;

        let mut report = CartValidation::default();
        for line in &cart.lines {
            let variant = match self.catalog.variant(line.variant_id).await {
                Some(variant) if variant.active => variant,
                _ => {
                    report.inactive.push(line.variant_id);
                    continue;
                }
            };

            if !self.is_available(&variant, line.quantity).await? {
                report.unavailable.push(line.variant_id);
            }

            let drift = (variant.price - line.unit_price).cents().abs();
            if drift * 100 > line.unit_price.cents().abs() * PRICE_DRIFT_PERCENT {
                report.price_changed.push(PriceChange {
                    variant_id: line.variant_id,
                    cart_price: line.unit_price,
                    current_price: variant.price,
                });
            }
        }
        Ok(report)
    }

    async fn sellable(&self, variant_id: VariantId) -> Result<CatalogVariant> {
        let variant = self
            .catalog
            .variant(variant_id)
            .await
            .ok_or(CartError::VariantNotFound(variant_id))?;
        if !variant.active {
            return Err(CartError::VariantInactive(variant_id).into());
        }
        Ok(variant)
    }

    async fn is_available(&self, variant: &CatalogVariant, quantity: u32) -> Result<bool> {
        if !variant.track_inventory || variant.allow_backorder {
            return Ok(true);
        }
        match self.ledger.check_availability(variant.id, quantity).await {
            Ok(available) => Ok(available),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ensure_available(&self, variant: &CatalogVariant, quantity: u32) -> Result<()> {
        if self.is_available(variant, quantity).await? {
            return Ok(());
        }
        let available = self.ledger.quantity(variant.id).await.unwrap_or(0).max(0);
        Err(CartError::InsufficientStock {
            variant_id: variant.id,
            requested: quantity,
            available,
        }
        .into())
    }
}

fn added(variant_id: VariantId, held: u32, quantity: u32) -> std::result::Result<u32, CartError> {
    held.checked_add(quantity)
        .ok_or(CartError::InvalidQuantity { variant_id, quantity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::config::DomainConfig;
    use crate::error::DomainError;
    use crate::inventory::StockSettings;
    use common::Actor;
    use event_store::InMemoryEventStore;

    async fn service() -> (Arc<InMemoryCatalog>, Arc<StockLedger>, CartService) {
        let store = Arc::new(InMemoryEventStore::new());
        let ledger = Arc::new(StockLedger::new(store, DomainConfig::default()));
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, quantity) in [(1u64, 5u32), (2, 1)] {
            let variant_id = VariantId::new(id);
            catalog
                .upsert(CatalogVariant::new(variant_id, format!("SKU-{id}"), "Tee", Money::from_cents(2000)))
                .await;
            ledger
                .register_variant(variant_id, StockSettings::default(), quantity, &Actor::system())
                .await
                .unwrap();
        }
        catalog
            .upsert(CatalogVariant::new(VariantId::new(3), "GIFT", "Gift card", Money::from_cents(500)).untracked())
            .await;
        (catalog.clone(), ledger.clone(), CartService::new(catalog, ledger))
    }

    #[tokio::test]
    async fn add_item_accumulates_quantity() {
        let (_, _, carts) = service().await;
        let owner = CustomerKey::guest("s1");

        carts.add_item(&owner, VariantId::new(1), 2).await.unwrap();
        let cart = carts.add_item(&owner, VariantId::new(1), 1).await.unwrap();

        assert_eq!(cart.quantity_of(VariantId::new(1)), 3);
        assert_eq!(carts.subtotal(&owner).await, Money::from_cents(6000));
    }

    #[tokio::test]
    async fn add_item_checks_stock_but_holds_none() {
        let (_, ledger, carts) = service().await;
        let owner = CustomerKey::guest("s1");

        let result = carts.add_item(&owner, VariantId::new(2), 2).await;
        assert!(matches!(
            result,
            Err(DomainError::Cart(CartError::InsufficientStock { available: 1, .. }))
        ));

        carts.add_item(&owner, VariantId::new(2), 1).await.unwrap();
        assert_eq!(ledger.quantity(VariantId::new(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn untracked_variants_are_always_available() {
        let (_, _, carts) = service().await;
        let cart = carts
            .add_item(&CustomerKey::guest("s"), VariantId::new(3), 50)
            .await
            .unwrap();
        assert_eq!(cart.item_count(), 50);
    }

    #[tokio::test]
    async fn add_item_past_u32_range_is_rejected() {
        let (_, _, carts) = service().await;
        let owner = CustomerKey::guest("s");
        carts.add_item(&owner, VariantId::new(3), u32::MAX).await.unwrap();

        let result = carts.add_item(&owner, VariantId::new(3), 1).await;
        assert!(matches!(
            result,
            Err(DomainError::Cart(CartError::InvalidQuantity { quantity: 1, .. }))
        ));
        assert_eq!(
            carts.cart(&owner).await.unwrap().quantity_of(VariantId::new(3)),
            u32::MAX
        );
    }

    #[tokio::test]
    async fn inactive_and_unknown_variants_are_rejected() {
        let (catalog, _, carts) = service().await;
        catalog.set_active(VariantId::new(1), false).await;
        let owner = CustomerKey::guest("s");

        assert!(matches!(
            carts.add_item(&owner, VariantId::new(1), 1).await,
            Err(DomainError::Cart(CartError::VariantInactive(_)))
        ));
        assert!(carts.add_item(&owner, VariantId::new(99), 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_requires_positive_quantity_and_existing_line() {
        let (catalog, _, carts) = service().await;
        let owner = CustomerKey::guest("s");
        carts.add_item(&owner, VariantId::new(1), 1).await.unwrap();

        assert!(matches!(
            carts.update_item(&owner, VariantId::new(1), 0).await,
            Err(DomainError::Cart(CartError::InvalidQuantity { .. }))
        ));
        assert!(matches!(
            carts.update_item(&owner, VariantId::new(3), 1).await,
            Err(DomainError::Cart(CartError::ItemNotFound(_)))
        ));

        catalog.set_price(VariantId::new(1), Money::from_cents(2500)).await;
        let cart = carts.update_item(&owner, VariantId::new(1), 4).await.unwrap();
        assert_eq!(cart.line(VariantId::new(1)).unwrap().unit_price, Money::from_cents(2500));
    }

    #[tokio::test]
    async fn merge_keeps_larger_quantity_and_drops_guest_cart() {
        let (_, _, carts) = service().await;
        let guest = CustomerKey::guest("session-1");
        let user = UserId::new();
        carts.add_item(&guest, VariantId::new(1), 2).await.unwrap();
        carts.add_item(&guest, VariantId::new(3), 1).await.unwrap();
        carts.add_item(&CustomerKey::User(user), VariantId::new(1), 1).await.unwrap();

        let merged = carts.merge_carts(&guest, user).await;

        assert_eq!(merged.quantity_of(VariantId::new(1)), 2);
        assert_eq!(merged.quantity_of(VariantId::new(3)), 1);
        assert!(carts.cart(&guest).await.is_none());
    }

    #[tokio::test]
    async fn validate_reports_drift_inactive_and_shortage() {
        let (catalog, ledger, carts) = service().await;
        let owner = CustomerKey::guest("s");
        carts.add_item(&owner, VariantId::new(1), 1).await.unwrap();
        carts.add_item(&owner, VariantId::new(2), 1).await.unwrap();
        carts.add_item(&owner, VariantId::new(3), 1).await.unwrap();

        catalog.set_price(VariantId::new(1), Money::from_cents(2300)).await;
        catalog.set_active(VariantId::new(3), false).await;
        ledger
            .adjust(VariantId::new(2), -1, crate::inventory::AdjustmentReason::Damaged, &Actor::staff("ops"))
            .await
            .unwrap();

        let report = carts.validate(&owner).await.unwrap();
        assert_eq!(report.unavailable, vec![VariantId::new(2)]);
        assert_eq!(report.inactive, vec![VariantId::new(3)]);
        assert_eq!(report.price_changed.len(), 1);
        assert!(!report.is_valid());
    }
}
