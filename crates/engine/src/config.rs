//! Engine configuration loaded from environment variables.

use std::time::Duration;

use common::Money;
use domain::DomainConfig;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `LOCK_TIMEOUT_MS`: per-key lock wait before `ConcurrencyTimeout` (default: `2000`)
/// - `SHIPPING_FEE_CENTS`: flat shipping fee added at checkout (default: `0`)
/// - `LOW_STOCK_THRESHOLD`: threshold for newly registered variants (default: `5`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
#[derive(Debug, Clone)]
pub struct Config {
    pub lock_timeout: Duration,
    pub shipping_fee: Money,
    pub low_stock_threshold: i64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparseable values fall
    /// back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            lock_timeout: lookup("LOCK_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            shipping_fee: lookup("SHIPPING_FEE_CENTS")
                .and_then(|v| v.parse().ok())
                .map(Money::from_cents)
                .unwrap_or(defaults.shipping_fee),
            low_stock_threshold: lookup("LOW_STOCK_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.low_stock_threshold),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
        }
    }

    /// The part of the configuration the domain services need.
    pub fn domain_config(&self) -> DomainConfig {
        DomainConfig {
            lock_timeout: self.lock_timeout,
            low_stock_threshold: self.low_stock_threshold,
        }
    }

    pub fn with_shipping_fee(mut self, fee: Money) -> Self {
        self.shipping_fee = fee;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            shipping_fee: Money::zero(),
            low_stock_threshold: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
