// src/store.rs
//! Persistence contracts consumed by the pipeline, the threat cache and the
//! tracker, plus two implementations: a process-local `MemoryStore` and a
//! `JsonFileStore` that survives restarts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::categorize::{AuState, Category};
use crate::threat::model::{Provenance, ThreatLevel};

pub const DEFAULT_QUERY_DAYS: u32 = 7;
pub const DEFAULT_QUERY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub title: String,
    /// Globally unique.
    pub url: String,
    pub content_normalized: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
    pub category: Category,
    pub state: Option<AuState>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleQuery {
    pub days: u32,
    pub category: Option<Category>,
    pub state: Option<AuState>,
    pub limit: usize,
}

impl Default for ArticleQuery {
    fn default() -> Self {
        Self {
            days: DEFAULT_QUERY_DAYS,
            category: None,
            state: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl ArticleQuery {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days as i64)
    }

    fn matches(&self, a: &StoredArticle, cutoff: DateTime<Utc>) -> bool {
        a.published_at >= cutoff
            && self.category.map_or(true, |c| a.category == c)
            && self.state.map_or(true, |s| a.state == Some(s))
    }
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert articles whose URL is not yet stored; existing URLs are skipped, never updated.
    async fn insert_new_only(&self, articles: Vec<StoredArticle>) -> Result<usize>;
    /// Newest-published first.
    async fn query_recent(&self, query: &ArticleQuery) -> Result<Vec<StoredArticle>>;
    async fn count_recent(&self, since: DateTime<Utc>) -> Result<usize>;
    async fn count_all(&self) -> Result<usize>;
}

#[async_trait]
pub trait ThreatStore: Send + Sync {
    /// Latest recorded reading, tagged `Provenance::Database`.
    async fn load_latest_threat_level(&self) -> Result<Option<ThreatLevel>>;
    async fn record_threat_level(&self, threat: &ThreatLevel) -> Result<()>;
    /// Readings with `fetched_at >= since`, newest first.
    async fn threat_history(&self, since: DateTime<Utc>) -> Result<Vec<ThreatLevel>>;
}

/* ----------------------------
In-memory store
---------------------------- */

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    articles: Vec<StoredArticle>,
    #[serde(default)]
    threat_levels: Vec<ThreatLevel>,
}

#[derive(Debug, Default)]
struct Inner {
    data: StoreData,
    urls: HashSet<String>,
}

impl Inner {
    fn from_data(mut data: StoreData) -> Self {
        data.threat_levels.retain(|t| {
            let ok = ThreatLevel::is_valid_level(t.level as i64);
            if !ok {
                tracing::warn!(level = t.level, "dropping stored threat level outside 1..=5");
            }
            ok
        });
        let mut urls = HashSet::with_capacity(data.articles.len());
        data.articles.retain(|a| urls.insert(a.url.clone()));
        Self { data, urls }
    }

    fn insert_new_only(&mut self, articles: Vec<StoredArticle>) -> usize {
        let mut inserted = 0;
        for a in articles {
            if self.urls.insert(a.url.clone()) {
                self.data.articles.push(a);
                inserted += 1;
            }
        }
        inserted
    }

    fn query_recent(&self, query: &ArticleQuery, now: DateTime<Utc>) -> Vec<StoredArticle> {
        let cutoff = query.cutoff(now);
        let mut rows: Vec<StoredArticle> = self
            .data
            .articles
            .iter()
            .filter(|a| query.matches(a, cutoff))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        rows.truncate(query.limit);
        rows
    }

    fn count_recent(&self, since: DateTime<Utc>) -> usize {
        self.data
            .articles
            .iter()
            .filter(|a| a.published_at >= since)
            .count()
    }

    fn latest_threat(&self) -> Option<ThreatLevel> {
        self.data
            .threat_levels
            .iter()
            .max_by_key(|t| t.fetched_at)
            .cloned()
            .map(|t| t.with_provenance(Provenance::Database))
    }

    fn record_threat(&mut self, threat: &ThreatLevel) {
        self.data.threat_levels.push(threat.clone());
    }

    fn threat_history(&self, since: DateTime<Utc>) -> Vec<ThreatLevel> {
        let mut rows: Vec<ThreatLevel> = self
            .data
            .threat_levels
            .iter()
            .filter(|t| t.fetched_at >= since)
            .cloned()
            .map(|t| t.with_provenance(Provenance::Database))
            .collect();
        rows.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
        rows
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn insert_new_only(&self, articles: Vec<StoredArticle>) -> Result<usize> {
        Ok(self.lock().insert_new_only(articles))
    }

    async fn query_recent(&self, query: &ArticleQuery) -> Result<Vec<StoredArticle>> {
        Ok(self.lock().query_recent(query, Utc::now()))
    }

    async fn count_recent(&self, since: DateTime<Utc>) -> Result<usize> {
        Ok(self.lock().count_recent(since))
    }

    async fn count_all(&self) -> Result<usize> {
        Ok(self.lock().data.articles.len())
    }
}

#[async_trait]
impl ThreatStore for MemoryStore {
    async fn load_latest_threat_level(&self) -> Result<Option<ThreatLevel>> {
        Ok(self.lock().latest_threat())
    }

    async fn record_threat_level(&self, threat: &ThreatLevel) -> Result<()> {
        self.lock().record_threat(threat);
        Ok(())
    }

    async fn threat_history(&self, since: DateTime<Utc>) -> Result<Vec<ThreatLevel>> {
        Ok(self.lock().threat_history(since))
    }
}

/* ----------------------------
JSON file store
---------------------------- */

const STORE_FILE: &str = "store.json";

/// Whole-state JSON snapshot in `dir/store.json`, rewritten (tmp + rename)
/// after every mutation. Reads are served from memory.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Open (or create) the store under `dir`. A missing file is an empty store.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating store dir {}", dir.display()))?;
        let path = dir.join(STORE_FILE);

        let data = match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str::<StoreData>(&s)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        tracing::info!(
            path = %path.display(),
            articles = data.articles.len(),
            threat_levels = data.threat_levels.len(),
            "json store opened"
        );

        Ok(Self {
            path,
            inner: Mutex::new(Inner::from_data(data)),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = {
            let inner = self.lock();
            serde_json::to_vec_pretty(&inner.data).context("serializing store")?
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for JsonFileStore {
    async fn insert_new_only(&self, articles: Vec<StoredArticle>) -> Result<usize> {
        let inserted = self.lock().insert_new_only(articles);
        if inserted > 0 {
            self.persist().await?;
        }
        Ok(inserted)
    }

    async fn query_recent(&self, query: &ArticleQuery) -> Result<Vec<StoredArticle>> {
        Ok(self.lock().query_recent(query, Utc::now()))
    }

    async fn count_recent(&self, since: DateTime<Utc>) -> Result<usize> {
        Ok(self.lock().count_recent(since))
    }

    async fn count_all(&self) -> Result<usize> {
        Ok(self.lock().data.articles.len())
    }
}

#[async_trait]
impl ThreatStore for JsonFileStore {
    async fn load_latest_threat_level(&self) -> Result<Option<ThreatLevel>> {
        Ok(self.lock().latest_threat())
    }

    async fn record_threat_level(&self, threat: &ThreatLevel) -> Result<()> {
        self.lock().record_threat(threat);
        self.persist().await
    }

    async fn threat_history(&self, since: DateTime<Utc>) -> Result<Vec<ThreatLevel>> {
        Ok(self.lock().threat_history(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str, hours_ago: i64, category: Category, state: Option<AuState>) -> StoredArticle {
        let now = Utc::now();
        StoredArticle {
            title: format!("story {url}"),
            url: url.into(),
            content_normalized: String::new(),
            published_at: now - Duration::hours(hours_ago),
            source_name: "Test".into(),
            category,
            state,
            scraped_at: now,
        }
    }

    fn threat(level: u8, hours_ago: i64) -> ThreatLevel {
        ThreatLevel {
            level,
            name: "PROBABLE".into(),
            description: "desc".into(),
            link: "https://example.gov.au/t".into(),
            fetched_at: Utc::now() - Duration::hours(hours_ago),
            provenance: Provenance::Scraped,
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_by_url() {
        let store = MemoryStore::new();
        let batch = vec![
            article("u1", 1, Category::Arrest, None),
            article("u2", 2, Category::General, None),
            article("u1", 3, Category::Policy, None),
        ];
        assert_eq!(store.insert_new_only(batch.clone()).await.unwrap(), 2);
        assert_eq!(store.insert_new_only(batch).await.unwrap(), 0);
        assert_eq!(store.count_all().await.unwrap(), 2);

        // first write wins, never updated
        let rows = store.query_recent(&ArticleQuery::default()).await.unwrap();
        let u1 = rows.iter().find(|a| a.url == "u1").unwrap();
        assert_eq!(u1.category, Category::Arrest);
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = MemoryStore::new();
        store
            .insert_new_only(vec![
                article("old", 24 * 10, Category::Arrest, Some(AuState::Nsw)),
                article("a", 5, Category::Arrest, Some(AuState::Nsw)),
                article("b", 1, Category::Arrest, Some(AuState::Vic)),
                article("c", 3, Category::Incident, Some(AuState::Nsw)),
            ])
            .await
            .unwrap();

        let all = store.query_recent(&ArticleQuery::default()).await.unwrap();
        let urls: Vec<_> = all.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["b", "c", "a"]);

        let q = ArticleQuery {
            category: Some(Category::Arrest),
            state: Some(AuState::Nsw),
            ..Default::default()
        };
        let rows = store.query_recent(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "a");

        let q = ArticleQuery {
            limit: 1,
            ..Default::default()
        };
        assert_eq!(store.query_recent(&q).await.unwrap()[0].url, "b");

        let since = Utc::now() - Duration::hours(24);
        assert_eq!(store.count_recent(since).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn latest_threat_is_newest_and_tagged_database() {
        let store = MemoryStore::new();
        assert!(store.load_latest_threat_level().await.unwrap().is_none());
        store.record_threat_level(&threat(3, 5)).await.unwrap();
        store.record_threat_level(&threat(4, 1)).await.unwrap();

        let latest = store.load_latest_threat_level().await.unwrap().unwrap();
        assert_eq!(latest.level, 4);
        assert_eq!(latest.provenance, Provenance::Database);

        let hist = store
            .threat_history(Utc::now() - Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(hist.len(), 1);
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(tmp.path()).await.unwrap();
            store
                .insert_new_only(vec![article("u1", 1, Category::Incident, Some(AuState::Qld))])
                .await
                .unwrap();
            store.record_threat_level(&threat(3, 0)).await.unwrap();
            assert!(store.path().exists());
        }

        let reopened = JsonFileStore::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.count_all().await.unwrap(), 1);
        assert_eq!(
            reopened
                .insert_new_only(vec![article("u1", 1, Category::General, None)])
                .await
                .unwrap(),
            0
        );
        let latest = reopened.load_latest_threat_level().await.unwrap().unwrap();
        assert_eq!(latest.level, 3);
    }

    #[tokio::test]
    async fn json_store_drops_out_of_range_levels() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bad = serde_json::to_value(threat(3, 0)).unwrap();
        bad["level"] = serde_json::json!(9);
        let doc = serde_json::json!({ "articles": [], "threat_levels": [bad] });
        std::fs::write(tmp.path().join(STORE_FILE), doc.to_string()).unwrap();

        let store = JsonFileStore::open(tmp.path()).await.unwrap();
        assert!(store.load_latest_threat_level().await.unwrap().is_none());
    }
}
