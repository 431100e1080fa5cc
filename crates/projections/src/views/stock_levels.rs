//! Stock levels folded from the variant ledger streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::VariantId;
use domain::Aggregate;
use domain::inventory::{AdjustmentReason, LedgerEntry, StockEvent, VariantStock};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// One variant as seen by replaying its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub variant_id: VariantId,
    /// Sum of every ledger delta.
    pub quantity: i64,
    pub low_stock_threshold: i64,
    pub allow_backorder: bool,
    pub entry_count: usize,
    /// Net delta per reason.
    pub by_reason: BTreeMap<AdjustmentReason, i64>,
    /// Entries whose `quantity_before` did not match the previous result.
    pub chain_breaks: usize,
    pub last_changed_at: Option<DateTime<Utc>>,
}

impl StockLevel {
    fn new(variant_id: VariantId) -> Self {
        Self {
            variant_id,
            quantity: 0,
            low_stock_threshold: 0,
            allow_backorder: false,
            entry_count: 0,
            by_reason: BTreeMap::new(),
            chain_breaks: 0,
            last_changed_at: None,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity > 0 && self.quantity <= self.low_stock_threshold
    }

    fn record(&mut self, entry: &LedgerEntry) {
        let expected = self.quantity.checked_add(entry.delta);
        if entry.quantity_before != self.quantity || expected != Some(entry.resulting_quantity) {
            self.chain_breaks += 1;
        }
        self.quantity = self.quantity.saturating_add(entry.delta);
        self.entry_count += 1;
        let total = self.by_reason.entry(entry.reason).or_default();
        *total = total.saturating_add(entry.delta);
        self.last_changed_at = Some(entry.recorded_at);
    }
}

/// How many ledger entries of one kind reference the same order and variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderStockActivity {
    pub deductions: u32,
    pub restocks: u32,
}

#[derive(Default)]
struct StockLevelsState {
    variants: HashMap<VariantId, StockLevel>,
    /// Keyed by (entry reference, variant).
    per_order: HashMap<(String, VariantId), OrderStockActivity>,
    position: ProjectionPosition,
}

/// Read model of per-variant quantities, rebuilt from ledger entries only.
#[derive(Clone, Default)]
pub struct StockLevelsView {
    state: Arc<RwLock<StockLevelsState>>,
}

impl StockLevelsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, variant_id: VariantId) -> Option<StockLevel> {
        self.state.read().await.variants.get(&variant_id).cloned()
    }

    /// All variants in id order.
    pub async fn all(&self) -> Vec<StockLevel> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state.variants.values().cloned().collect();
        levels.sort_by_key(|l| l.variant_id);
        levels
    }

    pub async fn low_stock(&self) -> Vec<StockLevel> {
        let mut levels = self.all().await;
        levels.retain(StockLevel::is_low_stock);
        levels
    }

    /// Variants below zero; only legal under backorder.
    pub async fn negative(&self) -> Vec<StockLevel> {
        let mut levels = self.all().await;
        levels.retain(|l| l.quantity < 0);
        levels
    }

    /// Deduction and restock counts recorded against `reference` (an order id).
    pub async fn order_activity(&self, reference: &str, variant_id: VariantId) -> OrderStockActivity {
        self.state
            .read()
            .await
            .per_order
            .get(&(reference.to_string(), variant_id))
            .copied()
            .unwrap_or_default()
    }

    /// Every (reference, variant) pair with ledger activity, sorted.
    pub async fn order_activities(&self) -> Vec<(String, VariantId, OrderStockActivity)> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .per_order
            .iter()
            .map(|((reference, variant_id), activity)| (reference.clone(), *variant_id, *activity))
            .collect();
        out.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        out
    }
}

#[async_trait]
impl Projection for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance(event);
        if event.stream_type != VariantStock::stream_type() {
            return Ok(());
        }

        match event.decode::<StockEvent>()? {
            StockEvent::VariantRegistered(data) => {
                let level = state
                    .variants
                    .entry(data.variant_id)
                    .or_insert_with(|| StockLevel::new(data.variant_id));
                level.low_stock_threshold = data.settings.low_stock_threshold;
                level.allow_backorder = data.settings.allow_backorder;
            }
            StockEvent::BackorderChanged(data) => {
                if let Some(level) = state.variants.get_mut(&data.variant_id) {
                    level.allow_backorder = data.allow_backorder;
                }
            }
            StockEvent::StockAdjusted(entry) => {
                state
                    .variants
                    .entry(entry.variant_id)
                    .or_insert_with(|| StockLevel::new(entry.variant_id))
                    .record(&entry);

                if let Some(reference) = &entry.reference {
                    let activity = state
                        .per_order
                        .entry((reference.clone(), entry.variant_id))
                        .or_default();
                    match entry.reason {
                        AdjustmentReason::OrderConfirm => activity.deductions += 1,
                        AdjustmentReason::OrderCancelRestock | AdjustmentReason::ReturnRestock => {
                            activity.restocks += 1
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = StockLevelsState::default();
        Ok(())
    }
}

impl ReadModel for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn count(&self) -> usize {
        // try_read so a held writer reads as empty instead of blocking
        self.state.try_read().map(|s| s.variants.len()).unwrap_or(0)
    }
}
