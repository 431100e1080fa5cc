//! Per-variant stock state folded from the ledger stream.

use chrono::Utc;
use common::{Actor, VariantId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{AdjustmentReason, InventoryError, LedgerEntry, StockEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    /// Explicit bypass of the non-negative rule.
    pub allow_backorder: bool,
    pub low_stock_threshold: i64,
}

impl Default for StockSettings {
    fn default() -> Self {
        Self {
            allow_backorder: false,
            low_stock_threshold: 5,
        }
    }
}

impl StockSettings {
    pub fn new(low_stock_threshold: i64) -> Self {
        Self {
            allow_backorder: false,
            low_stock_threshold,
        }
    }

    pub fn with_backorder(mut self, allow: bool) -> Self {
        self.allow_backorder = allow;
        self
    }
}

/// A requested quantity change for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub variant_id: VariantId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl Adjustment {
    pub fn new(variant_id: VariantId, delta: i64, reason: AdjustmentReason) -> Self {
        Self {
            variant_id,
            delta,
            reason,
            reference: None,
            notes: None,
        }
    }

    pub fn deduct(variant_id: VariantId, quantity: u32, reason: AdjustmentReason) -> Self {
        Self::new(variant_id, -i64::from(quantity), reason)
    }

    pub fn restock(variant_id: VariantId, quantity: u32, reason: AdjustmentReason) -> Self {
        Self::new(variant_id, i64::from(quantity), reason)
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Materialized stock of one variant.
#[derive(Debug, Clone, Default)]
pub struct VariantStock {
    variant_id: Option<VariantId>,
    quantity: i64,
    settings: StockSettings,
    entry_count: usize,
    version: Version,
}

impl Aggregate for VariantStock {
    type Event = StockEvent;

    fn stream_type() -> &'static str {
        "StockLedger"
    }

    fn stream_category() -> &'static str {
        "variant"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            StockEvent::VariantRegistered(data) => {
                self.variant_id = Some(data.variant_id);
                self.settings = data.settings;
            }
            StockEvent::StockAdjusted(entry) => {
                self.quantity = self.quantity.saturating_add(entry.delta);
                self.entry_count += 1;
            }
            StockEvent::BackorderChanged(data) => {
                self.settings.allow_backorder = data.allow_backorder;
            }
        }
    }
}

impl VariantStock {
    pub fn variant_id(&self) -> Option<VariantId> {
        self.variant_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn settings(&self) -> StockSettings {
        self.settings
    }

    /// Number of ledger entries folded so far.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn is_registered(&self) -> bool {
        self.variant_id.is_some()
    }

    /// Advisory: whether `quantity` units could be deducted right now.
    pub fn can_supply(&self, quantity: u32) -> bool {
        self.settings.allow_backorder || self.quantity >= i64::from(quantity)
    }

    pub fn is_low_stock(&self, threshold: i64) -> bool {
        self.quantity > 0 && self.quantity <= threshold
    }

    /// Validates an adjustment against the current quantity and builds the
    /// ledger entry it would produce. Does not change state.
    pub fn plan(&self, adjustment: &Adjustment, actor: &Actor) -> Result<LedgerEntry, InventoryError> {
        let variant_id = self
            .variant_id
            .ok_or(InventoryError::VariantNotFound(adjustment.variant_id))?;

        let invalid = InventoryError::InvalidQuantity {
            variant_id,
            delta: adjustment.delta,
        };
        if adjustment.delta == 0 {
            return Err(invalid);
        }

        // Deltas must be negatable so a shortage can report them.
        let (Some(resulting_quantity), Some(magnitude)) = (
            self.quantity.checked_add(adjustment.delta),
            adjustment.delta.checked_neg(),
        ) else {
            return Err(invalid);
        };
        let goes_negative = adjustment.delta < 0 && resulting_quantity < 0;
        if goes_negative && !self.settings.allow_backorder {
            return Err(InventoryError::InsufficientStock {
                variant_id,
                requested: magnitude,
                available: self.quantity.max(0),
            });
        }

        Ok(LedgerEntry {
            variant_id,
            delta: adjustment.delta,
            reason: adjustment.reason,
            quantity_before: self.quantity,
            resulting_quantity,
            actor: actor.clone(),
            reference: adjustment.reference.clone(),
            notes: adjustment.notes.clone(),
            backorder_bypass: goes_negative,
            recorded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(quantity: i64, settings: StockSettings) -> VariantStock {
        let mut stock = VariantStock::default();
        stock.apply(StockEvent::variant_registered(
            VariantId::new(1),
            settings,
            Actor::system(),
        ));
        if quantity != 0 {
            let entry = stock
                .plan(
                    &Adjustment::new(VariantId::new(1), quantity, AdjustmentReason::InitialStock),
                    &Actor::system(),
                )
                .unwrap();
            stock.apply(StockEvent::StockAdjusted(entry));
        }
        stock
    }

    #[test]
    fn plan_deduction_within_stock() {
        let stock = registered(5, StockSettings::default());
        let entry = stock
            .plan(
                &Adjustment::deduct(VariantId::new(1), 3, AdjustmentReason::OrderConfirm),
                &Actor::system(),
            )
            .unwrap();

        assert_eq!(entry.quantity_before, 5);
        assert_eq!(entry.resulting_quantity, 2);
        assert!(!entry.backorder_bypass);
        assert_eq!(stock.quantity(), 5, "planning must not mutate");
    }

    #[test]
    fn plan_rejects_overdraw_without_backorder() {
        let stock = registered(2, StockSettings::default());
        let result = stock.plan(
            &Adjustment::deduct(VariantId::new(1), 3, AdjustmentReason::OrderConfirm),
            &Actor::system(),
        );

        assert!(matches!(
            result,
            Err(InventoryError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        ));
    }

    #[test]
    fn plan_allows_overdraw_with_backorder_and_flags_it() {
        let stock = registered(1, StockSettings::default().with_backorder(true));
        let entry = stock
            .plan(
                &Adjustment::deduct(VariantId::new(1), 4, AdjustmentReason::OrderConfirm),
                &Actor::system(),
            )
            .unwrap();

        assert_eq!(entry.resulting_quantity, -3);
        assert!(entry.backorder_bypass);
    }

    #[test]
    fn plan_rejects_zero_delta() {
        let stock = registered(1, StockSettings::default());
        let result = stock.plan(
            &Adjustment::new(VariantId::new(1), 0, AdjustmentReason::ManualAdjustment),
            &Actor::system(),
        );
        assert!(matches!(result, Err(InventoryError::InvalidQuantity { .. })));
    }

    #[test]
    fn plan_rejects_deltas_that_overflow() {
        let stock = registered(5, StockSettings::default());
        for delta in [i64::MIN, i64::MAX] {
            let result = stock.plan(
                &Adjustment::new(VariantId::new(1), delta, AdjustmentReason::ManualAdjustment),
                &Actor::system(),
            );
            assert!(
                matches!(result, Err(InventoryError::InvalidQuantity { delta: d, .. }) if d == delta),
                "delta {delta}: {result:?}"
            );
        }
        assert_eq!(stock.quantity(), 5);
    }

    #[test]
    fn plan_on_unregistered_variant() {
        let stock = VariantStock::default();
        let result = stock.plan(
            &Adjustment::restock(VariantId::new(9), 1, AdjustmentReason::Restocked),
            &Actor::system(),
        );
        assert!(matches!(result, Err(InventoryError::VariantNotFound(_))));
    }

    #[test]
    fn backorder_switch_is_folded() {
        let mut stock = registered(0, StockSettings::default());
        assert!(!stock.can_supply(1));

        stock.apply(StockEvent::backorder_changed(VariantId::new(1), true, Actor::system()));
        assert!(stock.can_supply(1));
        assert_eq!(stock.quantity(), 0);
    }

    #[test]
    fn low_stock_excludes_zero() {
        let stock = registered(3, StockSettings::default());
        assert!(stock.is_low_stock(5));
        assert!(!stock.is_low_stock(2));
        assert!(!registered(0, StockSettings::default()).is_low_stock(5));
    }
}
