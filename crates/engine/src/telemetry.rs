//! Tracing and metrics bootstrap.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::error::{EngineError, Result};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when both are set. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::Telemetry(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    installed.map_err(|e| EngineError::Telemetry(e.to_string()))
}

/// Installs the Prometheus recorder behind the `metrics` macros and returns
/// the handle used to render the scrape output.
pub fn install_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_subscriber_is_an_error_not_a_panic() {
        let config = Config::default();
        let _ = init_tracing(&config);
        // Installed now, either by the call above or an earlier test.
        assert!(matches!(init_tracing(&config), Err(EngineError::Telemetry(_))));
    }
}
