use axum::{routing::get, Router};
use ::metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::AppConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish static config gauges.
    pub fn init(cfg: &AppConfig) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        gauge!("threat_cache_ttl_secs").set(cfg.threat.ttl_secs as f64);
        gauge!("threat_cache_max_stale_secs").set(cfg.threat.max_stale_secs as f64);
        gauge!("ingest_sources_configured").set(cfg.sources.len() as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
