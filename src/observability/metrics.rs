//! Prometheus metrics.

use crate::config::ObservabilityConfig;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Address to bind the scrape endpoint.
    pub listen_addr: SocketAddr,
}

impl MetricsConfig {
    /// Builds metrics configuration from settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unparseable listen address.
    pub fn from_settings(settings: &ObservabilityConfig) -> Result<Self> {
        let listen_addr = settings.metrics_listen.parse().map_err(|e| {
            Error::InvalidInput(format!(
                "invalid metrics listen address '{}': {e}",
                settings.metrics_listen
            ))
        })?;
        Ok(Self {
            enabled: settings.metrics_enabled,
            listen_addr,
        })
    }
}

/// Installs the Prometheus recorder.
///
/// With `expose` the scrape endpoint is served over HTTP; the exporter runs its
/// own background runtime for it.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    if expose {
        builder
            .with_http_listener(config.listen_addr)
            .install()
            .map_err(|e| Error::operation("metrics_listener_install", e))?;
        tracing::info!(listen = %config.listen_addr, "metrics endpoint listening");
        return Ok(None);
    }

    builder
        .install_recorder()
        .map(Some)
        .map_err(|e| Error::operation("metrics_recorder_install", e))
}
