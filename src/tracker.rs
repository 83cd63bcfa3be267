// src/tracker.rs
//! Change tracker that polls the threat cache and the article store while
//! anyone is listening, and broadcasts `UpdateEvent`s to subscribers.
//!
//! The poller is reference-counted by subscribers: it is spawned on the 0→1
//! transition and aborted on the 1→0 transition. With no subscribers there is
//! no background task at all.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::UpdateEvent;
use crate::store::{ArticleQuery, ArticleStore};
use crate::threat::ThreatLevelCache;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Window for the "recent articles" count probe.
pub const NEWS_WINDOW_HOURS: i64 = 24;

pub type Callback = Arc<dyn Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync>;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("tracker_subscribers", "Active update subscribers");
        describe_counter!("tracker_events_total", "Events broadcast, labelled by kind");
    });
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    list: Vec<(u64, Callback)>,
    poller: Option<JoinHandle<()>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Baseline {
    last_threat_level: Option<u8>,
    last_news_count: Option<usize>,
}

struct Inner {
    threat: ThreatLevelCache,
    articles: Arc<dyn ArticleStore>,
    poll_interval: Duration,
    subs: Mutex<Subscribers>,
    baseline: Mutex<Baseline>,
    poll_cycles: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

#[derive(Clone)]
pub struct UpdateTracker {
    inner: Arc<Inner>,
}

/// Handle returned by [`UpdateTracker::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    tracker: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.tracker.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl UpdateTracker {
    pub fn new(
        threat: ThreatLevelCache,
        articles: Arc<dyn ArticleStore>,
        poll_interval: Duration,
    ) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(Inner {
                threat,
                articles,
                poll_interval,
                subs: Mutex::new(Subscribers::default()),
                baseline: Mutex::new(Baseline::default()),
                poll_cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Register `callback`. The first subscriber starts the poller, which
    /// checks immediately and then every `poll_interval`.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut subs = lock(&self.inner.subs);
        let id = subs.next_id;
        subs.next_id += 1;
        subs.list.push((id, Arc::new(callback)));
        gauge!("tracker_subscribers").set(subs.list.len() as f64);

        if subs.list.len() == 1 && subs.poller.is_none() {
            tracing::debug!(target: "tracker", "first subscriber, starting poller");
            subs.poller = Some(spawn_poller(
                Arc::downgrade(&self.inner),
                self.inner.poll_interval,
            ));
        }

        Subscription {
            id,
            tracker: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subs).list.len()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.subs)
            .poller
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Completed poll cycles since construction.
    pub fn poll_cycles(&self) -> u64 {
        self.inner.poll_cycles.load(Ordering::SeqCst)
    }

    pub fn broadcast(&self, event: &UpdateEvent) {
        self.inner.broadcast(event)
    }

    /// Run one poll cycle now, outside the timer.
    pub async fn check_for_updates(&self) {
        self.inner.check_for_updates().await
    }

    pub fn notify_threat_update(&self, level: u8, name: &str, previous_level: Option<u8>) {
        self.inner
            .broadcast(&UpdateEvent::threat_update(level, name, previous_level));
    }

    pub fn notify_news_update(&self, count: usize, latest_title: Option<String>) {
        self.inner
            .broadcast(&UpdateEvent::news_update(count, latest_title));
    }
}

fn spawn_poller(weak: Weak<Inner>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.check_for_updates().await;
        }
    })
}

impl Inner {
    fn remove(&self, id: u64) {
        let mut subs = lock(&self.subs);
        subs.list.retain(|(sid, _)| *sid != id);
        gauge!("tracker_subscribers").set(subs.list.len() as f64);
        if subs.list.is_empty() {
            if let Some(handle) = subs.poller.take() {
                tracing::debug!(target: "tracker", "last subscriber left, stopping poller");
                handle.abort();
            }
        }
    }

    fn broadcast(&self, event: &UpdateEvent) {
        let callbacks: Vec<Callback> = lock(&self.subs)
            .list
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        counter!("tracker_events_total", "kind" => event.name()).increment(1);

        for cb in callbacks {
            match catch_unwind(AssertUnwindSafe(|| cb(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(target: "tracker", event = event.name(), error = ?e, "subscriber error")
                }
                Err(_) => {
                    tracing::error!(target: "tracker", event = event.name(), "subscriber panicked")
                }
            }
        }
    }

    async fn check_for_updates(&self) {
        tokio::join!(self.check_threat_level(), self.check_news());
        self.poll_cycles.fetch_add(1, Ordering::SeqCst);
    }

    async fn check_threat_level(&self) {
        let threat = match self.threat.get_threat_level().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(target: "tracker", error = %e, "threat level check failed");
                return;
            }
        };

        let previous = lock(&self.baseline).last_threat_level.replace(threat.level);
        if let Some(prev) = previous {
            if prev != threat.level {
                tracing::info!(target: "tracker", from = prev, to = threat.level, "threat level changed");
                self.broadcast(&UpdateEvent::threat_update(
                    threat.level,
                    threat.name,
                    Some(prev),
                ));
            }
        }
    }

    async fn check_news(&self) {
        let since = Utc::now() - chrono::Duration::hours(NEWS_WINDOW_HOURS);
        let count = match self.articles.count_recent(since).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(target: "tracker", error = ?e, "news count check failed");
                return;
            }
        };

        let previous = lock(&self.baseline).last_news_count.replace(count);
        let Some(prev) = previous else {
            return;
        };
        if count <= prev {
            return;
        }

        let probe = ArticleQuery {
            days: 1,
            limit: 1,
            ..Default::default()
        };
        let latest_title = match self.articles.query_recent(&probe).await {
            Ok(rows) => rows.into_iter().next().map(|a| a.title),
            Err(e) => {
                tracing::warn!(target: "tracker", error = ?e, "latest article lookup failed");
                None
            }
        };
        self.broadcast(&UpdateEvent::news_update(count - prev, latest_title));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::store::MemoryStore;
    use crate::threat::{CacheConfig, Provenance, ThreatError, ThreatLevel, ThreatSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU8;

    struct Dial(AtomicU8);

    #[async_trait]
    impl ThreatSource for Dial {
        async fn fetch_threat_level(&self) -> Result<ThreatLevel, ThreatError> {
            Ok(ThreatLevel {
                level: self.0.load(Ordering::SeqCst),
                name: "LEVEL".into(),
                description: "d".into(),
                link: "https://example.gov.au".into(),
                fetched_at: Utc::now(),
                provenance: Provenance::Scraped,
            })
        }
    }

    fn tracker(interval: Duration) -> (UpdateTracker, Arc<Dial>) {
        let dial = Arc::new(Dial(AtomicU8::new(3)));
        let cache = ThreatLevelCache::new(
            dial.clone(),
            Arc::new(MemoryStore::new()),
            CacheConfig {
                ttl: Duration::ZERO,
                max_stale: Duration::from_secs(60),
            },
        );
        let t = UpdateTracker::new(cache, Arc::new(MemoryStore::new()), interval);
        (t, dial)
    }

    fn collector() -> (Arc<Mutex<Vec<UpdateEvent>>>, impl Fn(&UpdateEvent) -> anyhow::Result<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |ev: &UpdateEvent| {
            sink.lock().unwrap().push(ev.clone());
            Ok(())
        })
    }

    #[tokio::test]
    async fn first_observation_only_seeds_baseline() {
        let (t, dial) = tracker(Duration::from_secs(3600));
        let (seen, cb) = collector();
        let _sub = t.subscribe(cb);

        // the poller's immediate check seeds the baseline
        tokio::time::timeout(Duration::from_secs(5), async {
            while t.poll_cycles() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(seen.lock().unwrap().is_empty());

        dial.0.store(4, Ordering::SeqCst);
        t.check_for_updates().await;
        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kind,
            EventKind::ThreatUpdate {
                level: 4,
                name: "LEVEL".into(),
                previous_level: Some(3)
            }
        );
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() {
        let (t, _) = tracker(Duration::from_secs(3600));
        let _bad = t.subscribe(|_| anyhow::bail!("closed"));
        let _panics = t.subscribe(|_| panic!("boom"));
        let (seen, cb) = collector();
        let _good = t.subscribe(cb);

        t.notify_news_update(2, Some("Headline".into()));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poller_lifetime_follows_subscribers() {
        let (t, _) = tracker(Duration::from_secs(3600));
        assert!(!t.is_polling());
        assert_eq!(t.poll_cycles(), 0);

        let a = t.subscribe(|_| Ok(()));
        assert!(t.is_polling());
        let b = t.subscribe(|_| Ok(()));
        assert_eq!(t.subscriber_count(), 2);

        a.unsubscribe();
        assert!(t.is_polling(), "one subscriber left");
        drop(b);
        assert_eq!(t.subscriber_count(), 0);
        assert!(!t.is_polling());
    }
}
