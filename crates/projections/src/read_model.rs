//! Read model trait for query-side views.

/// A read model folded from the journal.
///
/// Views are rebuilt from the journal alone, so they can be compared with the
/// services' materialized state during reconciliation.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of entities (variants, orders, coupons) tracked.
    fn count(&self) -> usize;
}
