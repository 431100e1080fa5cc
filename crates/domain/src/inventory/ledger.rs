//! The stock ledger service.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{Actor, VariantId};
use event_store::{EventEnvelope, EventStore, EventStoreExt, StreamId};

use crate::aggregate::Aggregate;
use crate::config::DomainConfig;
use crate::error::{DomainError, Result};
use crate::locks::{KeyedLocks, LockError, SlotGuard};
use crate::unit_of_work::{UnitOfWork, stream_for};

use super::{
    Adjustment, AdjustmentReason, InventoryError, LedgerEntry, StockEvent, StockSettings,
    VariantStock,
};

fn variant_lock_error(err: LockError<VariantId>) -> DomainError {
    err.or_missing(|id| InventoryError::VariantNotFound(id).into())
}

/// Result of re-folding a variant's ledger and comparing it with the
/// materialized quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub variant_id: VariantId,
    pub materialized: i64,
    /// Sum of every ledger delta.
    pub folded: i64,
    /// `resulting_quantity` recorded on the most recent entry.
    pub last_recorded: Option<i64>,
    pub entry_count: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.materialized == self.folded && self.last_recorded.unwrap_or(0) == self.folded
    }
}

/// Variants locked in ascending id order for one multi-variant change.
///
/// Adjustments are planned against working copies so that several entries
/// for the same variant see each other. Nothing reaches the guarded state
/// until [`LockedVariants::apply`] runs after a successful commit.
pub(crate) struct LockedVariants {
    guards: BTreeMap<VariantId, SlotGuard<VariantStock>>,
    working: BTreeMap<VariantId, VariantStock>,
    planned: Vec<LedgerEntry>,
}

impl LockedVariants {
    pub(crate) fn plan(&mut self, adjustment: &Adjustment, actor: &Actor) -> Result<(), InventoryError> {
        let stock = self
            .working
            .get_mut(&adjustment.variant_id)
            .ok_or(InventoryError::VariantNotFound(adjustment.variant_id))?;

        let entry = stock.plan(adjustment, actor).inspect_err(|e| {
            if e.shortage().is_some() {
                metrics::counter!("stock_insufficient_total").increment(1);
            }
        })?;
        stock.apply(StockEvent::StockAdjusted(entry.clone()));
        self.planned.push(entry);
        Ok(())
    }

    pub(crate) fn planned(&self) -> &[LedgerEntry] {
        &self.planned
    }

    pub(crate) fn stage(&self, uow: &mut UnitOfWork) -> Result<()> {
        for (variant_id, guard) in &self.guards {
            let events: Vec<StockEvent> = self
                .planned
                .iter()
                .filter(|e| e.variant_id == *variant_id)
                .cloned()
                .map(StockEvent::StockAdjusted)
                .collect();
            uow.stage::<VariantStock>(&stream_for::<VariantStock>(variant_id), guard.version(), &events)?;
        }
        Ok(())
    }

    /// Applies the planned entries to the locked state. Call only after the
    /// staged unit committed.
    pub(crate) fn apply(mut self) -> Vec<LedgerEntry> {
        for entry in &self.planned {
            if let Some(guard) = self.guards.get_mut(&entry.variant_id) {
                let next = guard.version().next();
                guard.apply(StockEvent::StockAdjusted(entry.clone()));
                guard.set_version(next);
                metrics::counter!("stock_adjustments_total", "reason" => entry.reason.as_str())
                    .increment(1);
            }
        }
        self.planned
    }
}

/// Sole mutator of per-variant stock.
///
/// Each variant has one lock; an adjustment holds it while it checks the
/// non-negative rule, appends its ledger entry and updates the materialized
/// quantity. If the append fails, neither changes.
pub struct StockLedger {
    store: Arc<dyn EventStore>,
    variants: KeyedLocks<VariantId, VariantStock>,
    config: DomainConfig,
}

impl StockLedger {
    pub fn new(store: Arc<dyn EventStore>, config: DomainConfig) -> Self {
        Self {
            store,
            variants: KeyedLocks::new("variant"),
            config,
        }
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Opens a variant's ledger. A positive initial quantity is recorded as
    /// an `initial_stock` entry so the ledger folds from zero.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn register_variant(
        &self,
        variant_id: VariantId,
        settings: StockSettings,
        initial_quantity: u32,
        actor: &Actor,
    ) -> Result<i64> {
        self.variants.insert(variant_id, VariantStock::default()).await;
        let mut guard = self
            .variants
            .lock(&variant_id, self.config.lock_timeout)
            .await
            .map_err(variant_lock_error)?;

        if guard.is_registered() {
            return Err(InventoryError::AlreadyRegistered(variant_id).into());
        }

        let mut state = VariantStock::default();
        let mut events = vec![StockEvent::variant_registered(variant_id, settings, actor.clone())];
        state.apply(events[0].clone());
        if initial_quantity > 0 {
            let entry = state.plan(
                &Adjustment::restock(variant_id, initial_quantity, AdjustmentReason::InitialStock),
                actor,
            )?;
            state.apply(StockEvent::StockAdjusted(entry.clone()));
            events.push(StockEvent::StockAdjusted(entry));
        }

        let mut uow = UnitOfWork::new(actor);
        let head = uow.stage::<VariantStock>(&stream_for::<VariantStock>(variant_id), guard.version(), &events)?;
        uow.commit(self.store.as_ref()).await?;

        state.set_version(head);
        *guard = state;
        tracing::info!(%variant_id, initial_quantity, "variant registered");
        Ok(guard.quantity())
    }

    /// Changes a variant's quantity by `delta`, returning the new quantity.
    pub async fn adjust(
        &self,
        variant_id: VariantId,
        delta: i64,
        reason: AdjustmentReason,
        actor: &Actor,
    ) -> Result<i64> {
        self.apply_adjustment(Adjustment::new(variant_id, delta, reason), actor)
            .await
    }

    #[tracing::instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn apply_adjustment(&self, adjustment: Adjustment, actor: &Actor) -> Result<i64> {
        let variant_id = adjustment.variant_id;
        let mut locked = self.lock_variants([variant_id]).await?;
        locked.plan(&adjustment, actor)?;

        let mut uow = UnitOfWork::new(actor);
        locked.stage(&mut uow)?;
        uow.commit(self.store.as_ref()).await?;

        let entries = locked.apply();
        let quantity = entries
            .last()
            .map(|e| e.resulting_quantity)
            .unwrap_or_default();
        tracing::info!(%variant_id, delta = adjustment.delta, reason = %adjustment.reason, quantity, "stock adjusted");
        Ok(quantity)
    }

    /// Applies several adjustments as one unit: all succeed or none do.
    ///
    /// Several adjustments for the same variant are applied in the given order.
    #[tracing::instrument(skip(self, adjustments, actor), fields(count = adjustments.len(), actor = %actor))]
    pub async fn bulk_adjust(&self, adjustments: Vec<Adjustment>, actor: &Actor) -> Result<Vec<LedgerEntry>> {
        if adjustments.is_empty() {
            return Ok(Vec::new());
        }

        let mut locked = self
            .lock_variants(adjustments.iter().map(|a| a.variant_id))
            .await?;
        for adjustment in &adjustments {
            locked.plan(adjustment, actor)?;
        }

        let mut uow = UnitOfWork::new(actor);
        locked.stage(&mut uow)?;
        uow.commit(self.store.as_ref()).await?;

        Ok(locked.apply())
    }

    /// Turns the backorder bypass on or off. Quantity is unchanged.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn set_backorder(&self, variant_id: VariantId, allow: bool, actor: &Actor) -> Result<()> {
        let mut guard = self
            .variants
            .lock(&variant_id, self.config.lock_timeout)
            .await
            .map_err(variant_lock_error)?;
        if !guard.is_registered() {
            return Err(InventoryError::VariantNotFound(variant_id).into());
        }
        if guard.settings().allow_backorder == allow {
            return Ok(());
        }

        let event = StockEvent::backorder_changed(variant_id, allow, actor.clone());
        let mut uow = UnitOfWork::new(actor);
        let head = uow.stage::<VariantStock>(
            &stream_for::<VariantStock>(variant_id),
            guard.version(),
            std::slice::from_ref(&event),
        )?;
        uow.commit(self.store.as_ref()).await?;

        guard.apply(event);
        guard.set_version(head);
        Ok(())
    }

    /// Advisory: the answer may be stale as soon as it is returned.
    pub async fn check_availability(&self, variant_id: VariantId, quantity: u32) -> Result<bool> {
        Ok(self.stock(variant_id).await?.can_supply(quantity))
    }

    pub async fn quantity(&self, variant_id: VariantId) -> Result<i64> {
        Ok(self.stock(variant_id).await?.quantity())
    }

    pub async fn is_registered(&self, variant_id: VariantId) -> bool {
        match self.stock(variant_id).await {
            Ok(stock) => stock.is_registered(),
            Err(_) => false,
        }
    }

    /// Snapshot of a variant's materialized state.
    pub async fn stock(&self, variant_id: VariantId) -> Result<VariantStock> {
        let stock = self
            .variants
            .read(&variant_id, self.config.lock_timeout)
            .await
            .map_err(variant_lock_error)?;
        if !stock.is_registered() {
            return Err(InventoryError::VariantNotFound(variant_id).into());
        }
        Ok(stock)
    }

    /// Variants with `0 < quantity <= threshold`, using each variant's own
    /// threshold unless an override is given.
    pub async fn low_stock_variants(&self, threshold_override: Option<i64>) -> Result<Vec<(VariantId, i64)>> {
        let all = self
            .variants
            .read_all(self.config.lock_timeout)
            .await
            .map_err(variant_lock_error)?;

        Ok(all
            .into_iter()
            .filter(|(_, stock)| stock.is_registered())
            .filter(|(_, stock)| {
                stock.is_low_stock(threshold_override.unwrap_or(stock.settings().low_stock_threshold))
            })
            .map(|(id, stock)| (id, stock.quantity()))
            .collect())
    }

    /// Every ledger entry of a variant, oldest first.
    pub async fn entries(&self, variant_id: VariantId) -> Result<Vec<LedgerEntry>> {
        let envelopes = self
            .store
            .read_stream(&stream_for::<VariantStock>(variant_id))
            .await?;
        let mut entries = Vec::new();
        for envelope in envelopes {
            if let StockEvent::StockAdjusted(entry) = envelope.decode()? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Re-folds the variant's ledger from the journal and compares it with the
    /// materialized quantity.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, variant_id: VariantId) -> Result<Reconciliation> {
        let materialized = self.quantity(variant_id).await?;
        let envelopes = self
            .store
            .read_stream(&stream_for::<VariantStock>(variant_id))
            .await?;
        let folded = VariantStock::fold(&envelopes)?;

        let mut last_recorded = None;
        for envelope in &envelopes {
            if let StockEvent::StockAdjusted(entry) = envelope.decode()? {
                last_recorded = Some(entry.resulting_quantity);
            }
        }

        let report = Reconciliation {
            variant_id,
            materialized,
            folded: folded.quantity(),
            last_recorded,
            entry_count: folded.entry_count(),
        };
        if !report.is_consistent() {
            tracing::warn!(?report, "stock ledger out of balance");
        }
        Ok(report)
    }

    /// Rebuilds every variant's materialized state from the journal.
    /// Returns the number of variants restored.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let envelopes = self.store.read_category(VariantStock::stream_type()).await?;
        let mut streams: BTreeMap<StreamId, Vec<EventEnvelope>> = BTreeMap::new();
        for envelope in envelopes {
            streams.entry(envelope.stream_id.clone()).or_default().push(envelope);
        }

        let mut restored = Vec::with_capacity(streams.len());
        for envelopes in streams.values() {
            let stock = VariantStock::fold(envelopes)?;
            if let Some(variant_id) = stock.variant_id() {
                restored.push((variant_id, stock));
            }
        }

        let count = restored.len();
        self.variants.replace_all(restored).await;
        tracing::info!(count, "stock ledger recovered");
        Ok(count)
    }

    pub(crate) async fn lock_variants(
        &self,
        variant_ids: impl IntoIterator<Item = VariantId>,
    ) -> Result<LockedVariants> {
        let guards = self
            .variants
            .lock_many(variant_ids, self.config.lock_timeout)
            .await
            .map_err(variant_lock_error)?;

        let working = guards
            .iter()
            .map(|(id, guard)| (*id, (**guard).clone()))
            .collect();

        Ok(LockedVariants {
            guards,
            working,
            planned: Vec::new(),
        })
    }
}
