// src/lib.rs
// Public library surface for the service binary, the probe and integration tests.

pub mod analytics;
pub mod api;
pub mod categorize;
pub mod config;
pub mod dedup;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod relevance;
pub mod store;
pub mod threat;
pub mod tracker;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::AppConfig;
pub use crate::events::{EventKind, UpdateEvent};
pub use crate::ingest::{IngestPipeline, IngestSummary};
pub use crate::threat::{Provenance, ThreatError, ThreatLevel, ThreatLevelCache};
pub use crate::tracker::{Subscription, UpdateTracker};

use std::sync::Arc;

use crate::ingest::providers::RssFeedSource;
use crate::ingest::types::FeedSource;
use crate::relevance::RelevanceFilter;
use crate::store::JsonFileStore;
use crate::threat::{CacheConfig, ThreatLevelFetcher};

/// Wire the production services from config: JSON file store, HTTP feed
/// sources, the threat fetcher/cache and the tracker.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let store = Arc::new(JsonFileStore::open(&cfg.store.dir).await?);
    let client = ThreatLevelFetcher::build_client(&cfg.threat.user_agent, cfg.http_timeout())?;

    let sources: Vec<Arc<dyn FeedSource>> = cfg
        .sources
        .iter()
        .map(|s| Arc::new(RssFeedSource::from_config(s, client.clone())) as Arc<dyn FeedSource>)
        .collect();
    let pipeline = Arc::new(IngestPipeline::new(
        sources,
        RelevanceFilter::from_toml()?,
        store.clone(),
    ));

    let fetcher = ThreatLevelFetcher::new(cfg.threat.url.clone(), client)
        .with_retries(cfg.threat.max_retries)
        .with_retry_base(cfg.retry_base());
    let threat = ThreatLevelCache::new(
        Arc::new(fetcher),
        store.clone(),
        CacheConfig {
            ttl: cfg.ttl(),
            max_stale: cfg.max_stale(),
        },
    );
    let tracker = UpdateTracker::new(threat.clone(), store.clone(), cfg.poll_interval());

    Ok(AppState {
        pipeline,
        threat,
        threats: store,
        tracker,
        heartbeat: cfg.heartbeat(),
    })
}
