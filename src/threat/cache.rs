// src/threat/cache.rs
//! Layered threat-level cache.
//!
//! Lookup order: fresh in-memory entry → fresh persisted record → live fetch
//! → stale in-memory entry (within `max_stale`) → persisted record. Concurrent
//! callers that miss the fresh entry share a single refresh task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;

use super::fetcher::ThreatSource;
use super::model::{CacheEntry, Provenance, ThreatLevel};
use super::{ensure_metrics_described, ThreatError};
use crate::store::ThreatStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_STALE: Duration = Duration::from_secs(24 * 60 * 60);

type SharedRefresh = Shared<BoxFuture<'static, Result<ThreatLevel, ThreatError>>>;

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_stale: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_stale: DEFAULT_MAX_STALE,
        }
    }
}

#[derive(Default)]
struct CacheState {
    entry: Option<CacheEntry>,
    inflight: Option<(u64, SharedRefresh)>,
}

struct Inner {
    source: Arc<dyn ThreatSource>,
    store: Arc<dyn ThreatStore>,
    ttl: chrono::Duration,
    max_stale: chrono::Duration,
    state: Mutex<CacheState>,
    next_refresh_id: AtomicU64,
}

#[derive(Clone)]
pub struct ThreatLevelCache {
    inner: Arc<Inner>,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

fn served(t: ThreatLevel) -> ThreatLevel {
    counter!("threat_served_total", "provenance" => t.provenance.as_str()).increment(1);
    t
}

impl ThreatLevelCache {
    pub fn new(
        source: Arc<dyn ThreatSource>,
        store: Arc<dyn ThreatStore>,
        cfg: CacheConfig,
    ) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                ttl: to_chrono(cfg.ttl),
                max_stale: to_chrono(cfg.max_stale),
                state: Mutex::new(CacheState::default()),
                next_refresh_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current threat level with an honest provenance tag. Errors only when
    /// the live fetch fails and nothing is cached or persisted.
    pub async fn get_threat_level(&self) -> Result<ThreatLevel, ThreatError> {
        let refresh = {
            let mut st = self.inner.lock();
            let now = Utc::now();

            if let Some(entry) = &st.entry {
                if now - entry.cached_at < self.inner.ttl {
                    let mut data = entry.data.clone();
                    if data.provenance == Provenance::Scraped {
                        data.provenance = Provenance::Cache;
                    }
                    return Ok(served(data));
                }
            }

            match &st.inflight {
                Some((_, fut)) => fut.clone(),
                None => {
                    let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let fut = self.inner.clone().spawn_refresh(id);
                    st.inflight = Some((id, fut.clone()));
                    fut
                }
            }
        };

        refresh.await.map(served)
    }

    /// In-memory entry, if any; does not trigger a refresh.
    pub fn peek(&self) -> Option<CacheEntry> {
        self.inner.lock().entry.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().inflight.is_some()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    /// The refresh runs as its own task so it completes even if every waiter is dropped.
    fn spawn_refresh(self: Arc<Self>, id: u64) -> SharedRefresh {
        let task = tokio::spawn({
            let inner = self.clone();
            async move { inner.refresh(id).await }
        });
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    self.clear_inflight(id);
                    Err(ThreatError::Internal(format!("refresh task failed: {join_err}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn clear_inflight(&self, id: u64) {
        let mut st = self.lock();
        if matches!(&st.inflight, Some((current, _)) if *current == id) {
            st.inflight = None;
        }
    }

    async fn refresh(&self, id: u64) -> Result<ThreatLevel, ThreatError> {
        let started = Utc::now();

        let latest_stored = match self.store.load_latest_threat_level().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "threat", error = ?e, "loading persisted threat level failed");
                None
            }
        };

        {
            let mut st = self.lock();
            if st.entry.is_none() {
                if let Some(stored) = &latest_stored {
                    st.entry = Some(CacheEntry {
                        data: stored.clone(),
                        cached_at: stored.fetched_at,
                    });
                }
            }
        }

        if let Some(stored) = &latest_stored {
            if started - stored.fetched_at < self.ttl {
                tracing::debug!(target: "threat", level = stored.level, "persisted threat level still fresh");
                self.clear_inflight(id);
                return Ok(stored.clone());
            }
        }

        let outcome = self.source.fetch_threat_level().await;

        match outcome {
            Ok(scraped) => {
                let changed = latest_stored
                    .as_ref()
                    .map_or(true, |stored| !stored.same_reading(&scraped));
                if changed {
                    tracing::info!(
                        target: "threat",
                        level = scraped.level,
                        name = %scraped.name,
                        "threat level updated"
                    );
                    if let Err(e) = self.store.record_threat_level(&scraped).await {
                        tracing::warn!(target: "threat", error = ?e, "recording threat level failed");
                    }
                }
                let mut st = self.lock();
                st.entry = Some(CacheEntry {
                    data: scraped.clone(),
                    cached_at: scraped.fetched_at,
                });
                st.inflight = None;
                Ok(scraped)
            }
            Err(err) => {
                tracing::error!(target: "threat", error = %err, "threat level refresh failed");
                let mut st = self.lock();
                st.inflight = None;

                let stale = st
                    .entry
                    .as_ref()
                    .filter(|e| started - e.cached_at < self.max_stale)
                    .map(|e| e.data.clone().with_provenance(Provenance::Fallback));

                if let Some(fallback) = stale {
                    Ok(fallback)
                } else if let Some(stored) = latest_stored {
                    let fallback = stored.with_provenance(Provenance::Database);
                    st.entry = Some(CacheEntry {
                        data: fallback.clone(),
                        cached_at: fallback.fetched_at,
                    });
                    Ok(fallback)
                } else {
                    Err(ThreatError::Unavailable(err.to_string()))
                }
            }
        }
    }
}
