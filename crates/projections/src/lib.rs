//! Journal-folded read models for audit and reconciliation.
//!
//! This crate provides:
//! - [`Projection`] trait for processing journal events into read models
//! - [`ProjectionProcessor`] for replaying the journal into projections
//! - Three views: stock levels, order status and coupon usage
//! - [`Reconciler`], comparing the views with the live services

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod reconciliation;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use reconciliation::{QuantityMismatch, ReconciliationReport, Reconciler};
pub use views::{CouponUsageView, OrderStatusView, StockLevelsView};
