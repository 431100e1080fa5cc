//! Cross-checks between journal-folded views and the live services.

use std::sync::Arc;

use common::{CouponId, VariantId};
use domain::StockLedger;
use event_store::EventStore;
use serde::Serialize;

use crate::Result;
use crate::processor::ProjectionProcessor;
use crate::views::{CouponUsageView, StockLevelsView};

/// A variant whose live quantity differs from the sum of its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuantityMismatch {
    pub variant_id: VariantId,
    pub journal: i64,
    pub materialized: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub variants_checked: usize,
    pub quantity_mismatches: Vec<QuantityMismatch>,
    /// Entries whose `quantity_before` disagrees with the running total.
    pub chain_breaks: usize,
    /// Negative stock on a variant that does not allow backorders.
    pub oversold: Vec<VariantId>,
    /// (order reference, variant) deducted more than once.
    pub duplicate_deductions: Vec<(String, VariantId)>,
    /// (order reference, variant) restocked more often than deducted.
    pub duplicate_restocks: Vec<(String, VariantId)>,
    pub coupons_over_limit: Vec<CouponId>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.quantity_mismatches.is_empty()
            && self.chain_breaks == 0
            && self.oversold.is_empty()
            && self.duplicate_deductions.is_empty()
            && self.duplicate_restocks.is_empty()
            && self.coupons_over_limit.is_empty()
    }
}

/// Rebuilds the views from scratch and compares them with `StockLedger`.
pub struct Reconciler {
    store: Arc<dyn EventStore>,
    ledger: Arc<StockLedger>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EventStore>, ledger: Arc<StockLedger>) -> Self {
        Self { store, ledger }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<ReconciliationReport> {
        let stock = StockLevelsView::new();
        let coupons = CouponUsageView::new();
        let mut processor = ProjectionProcessor::new(Arc::clone(&self.store));
        processor.register(Box::new(stock.clone()));
        processor.register(Box::new(coupons.clone()));
        processor.run_catch_up().await?;

        let mut report = ReconciliationReport::default();
        for level in stock.all().await {
            report.variants_checked += 1;
            report.chain_breaks += level.chain_breaks;
            if level.quantity < 0 && !level.allow_backorder {
                report.oversold.push(level.variant_id);
            }

            let materialized = self.ledger.quantity(level.variant_id).await?;
            if materialized != level.quantity {
                report.quantity_mismatches.push(QuantityMismatch {
                    variant_id: level.variant_id,
                    journal: level.quantity,
                    materialized,
                });
            }
        }

        for (reference, variant_id, activity) in stock.order_activities().await {
            if activity.deductions > 1 {
                report.duplicate_deductions.push((reference.clone(), variant_id));
            }
            if activity.restocks > activity.deductions {
                report.duplicate_restocks.push((reference, variant_id));
            }
        }

        report.coupons_over_limit = coupons.over_limit().await.into_iter().map(|c| c.coupon_id).collect();

        if report.is_clean() {
            tracing::info!(variants = report.variants_checked, "reconciliation clean");
        } else {
            metrics::counter!("reconciliation_failures_total").increment(1);
            tracing::error!(
                mismatches = report.quantity_mismatches.len(),
                chain_breaks = report.chain_breaks,
                oversold = report.oversold.len(),
                "reconciliation found discrepancies"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Actor;
    use domain::{AdjustmentReason, DomainConfig, StockSettings};
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn clean_ledger_reconciles() {
        let store = Arc::new(InMemoryEventStore::new());
        let ledger = Arc::new(StockLedger::new(store.clone(), DomainConfig::default()));
        ledger
            .register_variant(VariantId::new(1), StockSettings::default(), 10, &Actor::system())
            .await
            .unwrap();
        ledger
            .adjust(VariantId::new(1), -3, AdjustmentReason::Damaged, &Actor::staff("ops"))
            .await
            .unwrap();

        let report = Reconciler::new(store, ledger).run().await.unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.variants_checked, 1);
    }

    #[tokio::test]
    async fn stale_materialized_state_is_reported() {
        let store = Arc::new(InMemoryEventStore::new());
        let ledger = Arc::new(StockLedger::new(store.clone(), DomainConfig::default()));
        ledger
            .register_variant(VariantId::new(1), StockSettings::default(), 10, &Actor::system())
            .await
            .unwrap();

        // A second ledger writes behind the first one's back.
        let other = StockLedger::new(store.clone(), DomainConfig::default());
        other.recover().await.unwrap();
        other
            .adjust(VariantId::new(1), 4, AdjustmentReason::Restocked, &Actor::system())
            .await
            .unwrap();

        let report = Reconciler::new(store, ledger).run().await.unwrap();
        assert!(!report.is_clean());
        assert_eq!(
            report.quantity_mismatches,
            vec![QuantityMismatch {
                variant_id: VariantId::new(1),
                journal: 14,
                materialized: 10,
            }]
        );
    }
}
