//! End-to-end scenarios through the engine facade: oversell races,
//! cancellation with and without committed stock, cart merging and coupon
//! exhaustion.

use std::sync::Arc;

use common::{Actor, CouponId, CustomerKey, Money, UserId, VariantId};
use domain::{
    AdjustmentReason, CatalogVariant, Coupon, CouponError, Discount, DomainError, InMemoryCatalog,
    LimitScope, OrderStatus,
};
use engine::{CheckoutRequest, CommerceEngine, Config};

const SHIRT: u64 = 1;

async fn engine_with_stock(quantity: u32) -> Arc<CommerceEngine> {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog
        .upsert(CatalogVariant::new(VariantId::new(SHIRT), "SHIRT-L", "Linen shirt", Money::from_cents(4500)))
        .await;
    let engine = Arc::new(CommerceEngine::in_memory(catalog, Config::default()));
    engine
        .register_variant(VariantId::new(SHIRT), quantity, &Actor::system())
        .await
        .unwrap();
    engine
}

/// Fills the customer's cart and checks out, returning the pending order id.
async fn pending_order(engine: &CommerceEngine, customer: &str, quantity: u32) -> common::OrderId {
    let key = CustomerKey::guest(customer);
    engine
        .carts()
        .add_item(&key, VariantId::new(SHIRT), quantity)
        .await
        .unwrap();
    engine
        .checkout(CheckoutRequest::new(key), &Actor::customer(&CustomerKey::guest(customer)))
        .await
        .unwrap()
        .order_id()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirms_for_the_last_units_never_oversell() {
    let engine = engine_with_stock(5).await;
    let first = pending_order(&engine, "ana", 3).await;
    let second = pending_order(&engine, "ben", 3).await;

    let a = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.confirm_order(first, &Actor::system()).await })
    };
    let b = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.confirm_order(second, &Actor::system()).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(failure.is_insufficient_stock(), "unexpected error: {failure}");
    assert_eq!(engine.ledger().quantity(VariantId::new(SHIRT)).await.unwrap(), 2);

    let losing = if results[0].is_ok() { second } else { first };
    let order = engine.orders().order(losing).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.rejected_attempts(), 1);
}

#[tokio::test]
async fn cancelling_an_unconfirmed_order_leaves_stock_alone() {
    let engine = engine_with_stock(5).await;
    let order_id = pending_order(&engine, "cai", 2).await;

    let order = engine
        .cancel_order(order_id, Some("changed mind".into()), &Actor::system())
        .await
        .unwrap();

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(engine.ledger().quantity(VariantId::new(SHIRT)).await.unwrap(), 5);
    let entries = engine.ledger().entries(VariantId::new(SHIRT)).await.unwrap();
    let reference = order_id.to_string();
    assert!(entries.iter().all(|e| e.reference.as_deref() != Some(reference.as_str())));
}

#[tokio::test]
async fn cancelling_a_confirmed_order_restocks_exactly_once() {
    let engine = engine_with_stock(5).await;
    let order_id = pending_order(&engine, "dee", 2).await;
    engine.confirm_order(order_id, &Actor::system()).await.unwrap();
    assert_eq!(engine.ledger().quantity(VariantId::new(SHIRT)).await.unwrap(), 3);

    let order = engine.cancel_order(order_id, None, &Actor::staff("ops")).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);

    let reference = order_id.to_string();
    let movements: Vec<(i64, AdjustmentReason)> = engine
        .ledger()
        .entries(VariantId::new(SHIRT))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reference.as_deref() == Some(reference.as_str()))
        .map(|e| (e.delta, e.reason))
        .collect();
    assert_eq!(
        movements,
        vec![
            (-2, AdjustmentReason::OrderConfirm),
            (2, AdjustmentReason::OrderCancelRestock)
        ]
    );
    assert_eq!(engine.ledger().quantity(VariantId::new(SHIRT)).await.unwrap(), 5);

    // A second cancel is a no-op, not a second restock.
    engine.cancel_order(order_id, None, &Actor::staff("ops")).await.unwrap();
    assert_eq!(engine.ledger().quantity(VariantId::new(SHIRT)).await.unwrap(), 5);
}

#[tokio::test]
async fn guest_cart_merges_into_user_cart_by_max_quantity() {
    let engine = engine_with_stock(10).await;
    let guest = CustomerKey::guest("session-42");
    let user_id = UserId::new();
    let user = CustomerKey::User(user_id);
    engine.carts().add_item(&guest, VariantId::new(SHIRT), 2).await.unwrap();
    engine.carts().add_item(&user, VariantId::new(SHIRT), 1).await.unwrap();

    let merged = engine.merge_carts(&guest, user_id).await;

    assert_eq!(merged.owner, user);
    assert_eq!(merged.quantity_of(VariantId::new(SHIRT)), 2);
    assert_eq!(merged.lines.len(), 1);
    assert!(engine.carts().cart(&guest).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_use_coupon_goes_to_exactly_one_guest() {
    let engine = engine_with_stock(10).await;
    let coupon_id = CouponId::new(1);
    engine
        .coupons()
        .register_coupon(
            Coupon::new(coupon_id, "ONCE", Discount::Fixed(Money::from_cents(1000))).usage_limit(1),
            &Actor::staff("marketing"),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for guest in ["g1", "g2"] {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .coupons()
                .try_consume(coupon_id, &CustomerKey::guest(guest), &Actor::system())
                .await
        }));
    }

    let mut records = Vec::new();
    let mut rejections = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => records.push(record),
            Err(e) => rejections.push(e),
        }
    }

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].usage_number, 1);
    assert!(matches!(
        rejections.as_slice(),
        [DomainError::Coupon(CouponError::LimitExceeded {
            scope: LimitScope::Global,
            ..
        })]
    ));
    assert_eq!(engine.coupons().times_used(coupon_id).await.unwrap(), 1);
}
