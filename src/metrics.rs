//! Metrics initialization for Prometheus exporter.
//!
//! Counters recorded by the dispatch chain:
//! - `doh_proxy_queries_total{protocol}`
//! - `doh_proxy_upstream_attempts_total{stage, result}`
//! - `doh_proxy_responses_total{result}`

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape. Must be called from
/// within a Tokio runtime.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(err.to_string()))?;

    Ok(())
}
