// tests/common/mod.rs
// Shared helpers for integration tests: feed builders, a local HTTP server
// and fake threat sources.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};

use threat_monitor::store::{ArticleQuery, ArticleStore, MemoryStore, StoredArticle, ThreatStore};
use threat_monitor::threat::{Provenance, ThreatError, ThreatLevel, ThreatSource};

/// Serve `router` on an ephemeral localhost port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    addr
}

/// RSS 2.0 document whose items are all published "now".
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let pub_date = Utc::now().to_rfc2822();
    let body: String = items
        .iter()
        .map(|(title, link, description)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <pubDate>{pub_date}</pubDate><description>{description}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>t</title>{body}</channel></rss>"#
    )
}

pub fn threat_page(level: u8, name: &str) -> String {
    format!(
        r#"<html><head></head><body>
<script id="ThreatLevelJson" type="application/json">{{"ThreatLevelNo":"{level}","ThreatLevelName":"{name}","ThreatLevelDesc":"Credible intelligence indicates intent.","ThreatLevelLink":"/national-threat-level"}}</script>
</body></html>"#
    )
}

/// Threat source with a settable level; `None` makes every call fail.
pub struct FakeThreatSource {
    level: AtomicU8,
    pub calls: AtomicUsize,
}

impl FakeThreatSource {
    pub fn new(level: Option<u8>) -> Arc<Self> {
        Arc::new(Self {
            level: AtomicU8::new(level.unwrap_or(0)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_level(&self, level: Option<u8>) {
        self.level.store(level.unwrap_or(0), Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThreatSource for FakeThreatSource {
    async fn fetch_threat_level(&self) -> Result<ThreatLevel, ThreatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.level.load(Ordering::SeqCst) {
            0 => Err(ThreatError::Http("connection refused".into())),
            level => Ok(ThreatLevel {
                level,
                name: if level >= 4 { "EXPECTED" } else { "PROBABLE" }.into(),
                description: "Credible intelligence indicates intent.".into(),
                link: "https://example.gov.au/national-threat-level".into(),
                fetched_at: Utc::now(),
                provenance: Provenance::Scraped,
            }),
        }
    }
}

/// Store whose reads succeed but every write fails, like a full or read-only disk.
#[derive(Default)]
pub struct ReadOnlyStore {
    inner: MemoryStore,
    pub failed_writes: AtomicUsize,
}

impl ReadOnlyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }

    fn reject(&self) -> anyhow::Error {
        self.failed_writes.fetch_add(1, Ordering::SeqCst);
        anyhow::anyhow!("no space left on device")
    }
}

#[async_trait]
impl ArticleStore for ReadOnlyStore {
    async fn insert_new_only(&self, _articles: Vec<StoredArticle>) -> anyhow::Result<usize> {
        Err(self.reject())
    }
    async fn query_recent(&self, query: &ArticleQuery) -> anyhow::Result<Vec<StoredArticle>> {
        self.inner.query_recent(query).await
    }
    async fn count_recent(&self, since: DateTime<Utc>) -> anyhow::Result<usize> {
        self.inner.count_recent(since).await
    }
    async fn count_all(&self) -> anyhow::Result<usize> {
        self.inner.count_all().await
    }
}

#[async_trait]
impl ThreatStore for ReadOnlyStore {
    async fn load_latest_threat_level(&self) -> anyhow::Result<Option<ThreatLevel>> {
        self.inner.load_latest_threat_level().await
    }
    async fn record_threat_level(&self, _threat: &ThreatLevel) -> anyhow::Result<()> {
        Err(self.reject())
    }
    async fn threat_history(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<ThreatLevel>> {
        self.inner.threat_history(since).await
    }
}
