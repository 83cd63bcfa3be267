//! Threat monitor service: binary entrypoint.
//! Boots the Axum HTTP server, wiring the stores, the threat cache, the
//! update tracker and the periodic feed ingestion.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use threat_monitor::config::AppConfig;
use threat_monitor::ingest::scheduler::spawn_ingest_scheduler;
use threat_monitor::metrics::Metrics;
use threat_monitor::{build_state, create_router};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - THREAT_MONITOR_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("THREAT_MONITOR_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("threat_monitor=info,warn"));

    // Shuttle may already have installed a global subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let cfg = AppConfig::load()?;
    let metrics = Metrics::init(&cfg)?;
    let state = build_state(&cfg).await?;

    if cfg.ingest.enabled {
        spawn_ingest_scheduler(
            state.pipeline.clone(),
            state.tracker.clone(),
            cfg.ingest_interval(),
        );
    }

    tracing::info!(
        sources = cfg.sources.len(),
        store = %cfg.store.dir.display(),
        ingest = cfg.ingest.enabled,
        "threat monitor started"
    );

    let router = create_router(state).merge(metrics.router());
    Ok(router.into())
}
