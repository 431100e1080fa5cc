//! Checkout: turning a cart into a pending order.

use common::{CustomerKey, Money};
use domain::{Cart, CartError, Catalog, OrderItem, PaymentMethod};

/// What the customer submits at checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer: CustomerKey,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
}

impl CheckoutRequest {
    pub fn new(customer: CustomerKey) -> Self {
        Self {
            customer,
            coupon_code: None,
            payment_method: PaymentMethod::default(),
        }
    }

    pub fn coupon_code(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }
}

/// Snapshots every cart line from the catalog: price, name and SKU as they
/// are now, not as they were when the line was added.
pub(crate) async fn snapshot_items(cart: &Cart, catalog: &dyn Catalog) -> domain::Result<Vec<OrderItem>> {
    if cart.is_empty() {
        return Err(CartError::EmptyCart.into());
    }

    let mut items = Vec::with_capacity(cart.lines.len());
    for line in &cart.lines {
        let variant = catalog
            .variant(line.variant_id)
            .await
            .ok_or(CartError::VariantNotFound(line.variant_id))?;
        if !variant.active {
            return Err(CartError::VariantInactive(line.variant_id).into());
        }

        let item = OrderItem::new(
            variant.id,
            variant.sku,
            variant.product_name,
            variant.price,
            line.quantity,
        );
        items.push(if variant.track_inventory { item } else { item.untracked() });
    }
    Ok(items)
}

pub(crate) fn subtotal(items: &[OrderItem]) -> Money {
    items.iter().map(OrderItem::line_total).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::VariantId;
    use domain::{CatalogVariant, InMemoryCatalog};

    fn cart_with(lines: &[(u64, u32, i64)]) -> Cart {
        let mut cart = Cart::new(CustomerKey::guest("g"));
        for &(id, quantity, cents) in lines {
            cart.lines.push(domain::CartLine {
                variant_id: VariantId::new(id),
                quantity,
                unit_price: Money::from_cents(cents),
            });
        }
        cart
    }

    #[tokio::test]
    async fn snapshots_current_catalog_price() {
        let catalog = InMemoryCatalog::new();
        catalog
            .upsert(CatalogVariant::new(VariantId::new(1), "TEE-M", "Tee", Money::from_cents(1800)))
            .await;
        catalog
            .upsert(CatalogVariant::new(VariantId::new(2), "GIFT", "Gift card", Money::from_cents(5000)).untracked())
            .await;

        let items = snapshot_items(&cart_with(&[(1, 2, 1500), (2, 1, 5000)]), &catalog)
            .await
            .unwrap();

        assert_eq!(items[0].unit_price, Money::from_cents(1800));
        assert_eq!(items[0].name_at_purchase, "Tee");
        assert!(items[0].track_inventory);
        assert!(!items[1].track_inventory);
        assert_eq!(subtotal(&items), Money::from_cents(8600));
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let catalog = InMemoryCatalog::new();
        let err = snapshot_items(&cart_with(&[]), &catalog).await.unwrap_err();
        assert!(matches!(err, domain::DomainError::Cart(CartError::EmptyCart)));
    }

    #[tokio::test]
    async fn inactive_variant_is_rejected() {
        let catalog = InMemoryCatalog::new();
        catalog
            .upsert(CatalogVariant::new(VariantId::new(1), "OLD", "Retired", Money::from_cents(100)).inactive())
            .await;

        let err = snapshot_items(&cart_with(&[(1, 1, 100)]), &catalog).await.unwrap_err();
        assert!(matches!(err, domain::DomainError::Cart(CartError::VariantInactive(_))));
    }
}
