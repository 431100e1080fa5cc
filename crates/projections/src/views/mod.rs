//! Read models built from the journal.

mod coupon_usage;
mod order_status;
mod stock_levels;

pub use coupon_usage::{CouponUsageSummary, CouponUsageView};
pub use order_status::{OrderStatusRow, OrderStatusView};
pub use stock_levels::{OrderStockActivity, StockLevel, StockLevelsView};
