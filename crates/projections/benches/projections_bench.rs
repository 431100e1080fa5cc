use std::sync::Arc;

use common::{Actor, CustomerKey, Money, VariantId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CouponUsageTracker, DomainConfig, NewOrder, OrderItem, OrderStateMachine, StockLedger,
    StockSettings,
};
use event_store::InMemoryEventStore;
use projections::{OrderStatusView, Projection, ProjectionProcessor, Reconciler, StockLevelsView};

/// Journal with `orders` confirmed orders spread over ten variants.
fn populated(rt: &tokio::runtime::Runtime, orders: usize) -> (Arc<InMemoryEventStore>, Arc<StockLedger>) {
    let store = Arc::new(InMemoryEventStore::new());
    let config = DomainConfig::default();
    let ledger = Arc::new(StockLedger::new(store.clone(), config.clone()));
    let coupons = Arc::new(CouponUsageTracker::new(store.clone(), config.clone()));
    let machine = OrderStateMachine::new(store.clone(), ledger.clone(), coupons, config);
    let actor = Actor::system();

    rt.block_on(async {
        for id in 1..=10 {
            ledger
                .register_variant(VariantId::new(id), StockSettings::default(), 1_000_000, &actor)
                .await
                .unwrap();
        }
        for n in 0..orders {
            let id = (n % 10) as u64 + 1;
            let item = OrderItem::new(VariantId::new(id), format!("SKU-{id}"), "Widget", Money::from_cents(900), 2);
            let order = machine
                .place_order(NewOrder::new(CustomerKey::guest(format!("g{n}")), vec![item]), &actor)
                .await
                .unwrap();
            machine.confirm(order.order_id().unwrap(), &actor).await.unwrap();
        }
    });
    (store, ledger)
}

fn bench_catch_up(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, _) = populated(&rt, 300);

    c.bench_function("projections/catch_up_300_orders", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut processor = ProjectionProcessor::new(store.clone());
                processor.register(Box::new(StockLevelsView::new()) as Box<dyn Projection>);
                processor.register(Box::new(OrderStatusView::new()));
                processor.run_catch_up().await.unwrap();
            });
        });
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ledger) = populated(&rt, 300);
    let reconciler = Reconciler::new(store, ledger);

    c.bench_function("projections/reconcile_300_orders", |b| {
        b.iter(|| {
            rt.block_on(async {
                assert!(reconciler.run().await.unwrap().is_clean());
            });
        });
    });
}

criterion_group!(benches, bench_catch_up, bench_reconcile);
criterion_main!(benches);
