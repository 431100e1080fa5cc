//! Inventory reservation and order lifecycle core.
//!
//! This crate provides:
//! - `StockLedger`, the only writer of per-variant stock, with an audit trail
//! - `CouponUsageTracker`, enforcing global and per-customer coupon limits
//! - `OrderStateMachine` and `ReservationCoordinator`, moving orders along the
//!   status graph with their stock and coupon side effects
//! - `CartService`, advisory carts that never hold stock
//!
//! Every mutation locks its keys, appends to the journal and only then
//! updates the materialized state, so a failed append changes nothing.

pub mod aggregate;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod coupon;
pub mod error;
pub mod inventory;
pub mod locks;
pub mod order;
pub mod unit_of_work;

pub use aggregate::{Aggregate, DomainEvent};
pub use cart::{Cart, CartError, CartLine, CartService, CartValidation};
pub use catalog::{Catalog, CatalogVariant, InMemoryCatalog};
pub use config::DomainConfig;
pub use coupon::{Coupon, CouponError, CouponUsageRecord, CouponUsageTracker, Discount, LimitScope};
pub use error::{DomainError, Result};
pub use inventory::{
    Adjustment, AdjustmentReason, InventoryError, LedgerEntry, Reconciliation, Shortage,
    StockLedger, StockSettings,
};
pub use order::{
    NewOrder, Order, OrderError, OrderEvent, OrderItem, OrderStateMachine, OrderStatus,
    OrderTotals, PaymentMethod, PaymentStatus, ReservationCoordinator, ReturnRequest,
    ReturnStatus, StatusLogEntry, StockLine,
};
pub use unit_of_work::UnitOfWork;
