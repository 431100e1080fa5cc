//! Commerce engine: the entry point the API layer calls.
//!
//! This crate provides:
//! - [`CommerceEngine`], wiring stock, coupons, orders and carts over one journal
//! - Checkout from cart and catalog snapshots
//! - [`PaymentHandler`] for payment gateway callbacks
//! - [`Config`] from environment variables and the tracing/metrics bootstrap

pub mod checkout;
pub mod config;
pub mod engine;
pub mod error;
pub mod payment;
pub mod telemetry;

pub use checkout::CheckoutRequest;
pub use config::{Config, LogFormat};
pub use engine::{CommerceEngine, RecoveryStats};
pub use error::{EngineError, Result};
pub use payment::{PaymentEvent, PaymentHandler};
pub use telemetry::{init_tracing, install_metrics};
