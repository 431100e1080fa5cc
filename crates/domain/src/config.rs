use std::time::Duration;

/// Tunables shared by the domain services.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    /// Upper bound on waiting for a per-key lock before `ConcurrencyTimeout`.
    pub lock_timeout: Duration,

    /// Default low-stock threshold for newly registered variants.
    pub low_stock_threshold: i64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            low_stock_threshold: 5,
        }
    }
}

impl DomainConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
