// src/analytics.rs
//! Read models for the analytics dashboard: summary counters, category and
//! state distributions, daily news volume and the threat-level timeline.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::categorize::{AuState, Category};
use crate::store::{ArticleQuery, ArticleStore, StoredArticle, ThreatStore};
use crate::threat::ThreatLevel;

pub const DEFAULT_TIMELINE_DAYS: u32 = 90;
pub const DEFAULT_VOLUME_DAYS: u32 = 30;
pub const DEFAULT_DISTRIBUTION_DAYS: u32 = 30;
/// Summary "most active" / "dominant" look at this window.
const SUMMARY_WINDOW_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsOptions {
    pub timeline_days: u32,
    pub volume_days: u32,
    pub distribution_days: u32,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            timeline_days: DEFAULT_TIMELINE_DAYS,
            volume_days: DEFAULT_VOLUME_DAYS,
            distribution_days: DEFAULT_DISTRIBUTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub current_threat_level: Option<u8>,
    pub current_threat_name: Option<String>,
    pub total_articles: usize,
    pub articles_last_24h: usize,
    pub articles_last_7d: usize,
    pub most_active_state: Option<AuState>,
    pub dominant_category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatTimelinePoint {
    pub date: NaiveDate,
    pub level: u8,
    pub level_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsVolumePoint {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Share<K> {
    #[serde(flatten)]
    pub key: K,
    pub count: usize,
    /// Rounded whole percent of the window total.
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateKey {
    pub state: AuState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryKey {
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub summary: AnalyticsSummary,
    pub threat_timeline: Vec<ThreatTimelinePoint>,
    pub news_volume: Vec<NewsVolumePoint>,
    pub state_distribution: Vec<Share<StateKey>>,
    pub category_distribution: Vec<Share<CategoryKey>>,
}

fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        ((count as f64 / total as f64) * 100.0).round() as u32
    }
}

/// Sorted by count descending; ties keep the enum order.
fn ranked<K: Ord + Copy>(counts: BTreeMap<K, usize>) -> Vec<(K, usize)> {
    let mut rows: Vec<(K, usize)> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows
}

fn since(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(days as i64)
}

pub fn state_distribution(
    articles: &[StoredArticle],
    from: DateTime<Utc>,
) -> Vec<Share<StateKey>> {
    let mut counts: BTreeMap<AuState, usize> = BTreeMap::new();
    for a in articles.iter().filter(|a| a.published_at >= from) {
        if let Some(st) = a.state {
            *counts.entry(st).or_default() += 1;
        }
    }
    let total: usize = counts.values().sum();
    ranked(counts)
        .into_iter()
        .map(|(state, count)| Share {
            key: StateKey { state },
            count,
            percentage: percent(count, total),
        })
        .collect()
}

pub fn category_distribution(
    articles: &[StoredArticle],
    from: DateTime<Utc>,
) -> Vec<Share<CategoryKey>> {
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    for a in articles.iter().filter(|a| a.published_at >= from) {
        *counts.entry(a.category).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    ranked(counts)
        .into_iter()
        .map(|(category, count)| Share {
            key: CategoryKey { category },
            count,
            percentage: percent(count, total),
        })
        .collect()
}

/// Articles per publication day, oldest first.
pub fn news_volume(articles: &[StoredArticle], from: DateTime<Utc>) -> Vec<NewsVolumePoint> {
    let mut by_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for a in articles.iter().filter(|a| a.published_at >= from) {
        *by_day.entry(a.published_at.date_naive()).or_default() += 1;
    }
    by_day
        .into_iter()
        .map(|(date, count)| NewsVolumePoint { date, count })
        .collect()
}

/// One point per day (the latest reading that day), oldest first.
pub fn threat_timeline(readings: &[ThreatLevel]) -> Vec<ThreatTimelinePoint> {
    let mut by_day: HashMap<NaiveDate, &ThreatLevel> = HashMap::new();
    for r in readings {
        let day = r.fetched_at.date_naive();
        match by_day.get(&day) {
            Some(existing) if existing.fetched_at >= r.fetched_at => {}
            _ => {
                by_day.insert(day, r);
            }
        }
    }
    let mut points: Vec<ThreatTimelinePoint> = by_day
        .into_iter()
        .map(|(date, r)| ThreatTimelinePoint {
            date,
            level: r.level,
            level_name: r.name.clone(),
        })
        .collect();
    points.sort_by_key(|p| p.date);
    points
}

pub fn summarize(
    articles: &[StoredArticle],
    total_articles: usize,
    current: Option<&ThreatLevel>,
    now: DateTime<Utc>,
) -> AnalyticsSummary {
    let day_ago = now - Duration::hours(24);
    let week_ago = since(now, SUMMARY_WINDOW_DAYS);

    AnalyticsSummary {
        current_threat_level: current.map(|t| t.level),
        current_threat_name: current.map(|t| t.name.clone()),
        total_articles,
        articles_last_24h: articles.iter().filter(|a| a.published_at >= day_ago).count(),
        articles_last_7d: articles.iter().filter(|a| a.published_at >= week_ago).count(),
        most_active_state: state_distribution(articles, week_ago)
            .first()
            .map(|s| s.key.state),
        dominant_category: category_distribution(articles, week_ago)
            .first()
            .map(|c| c.key.category),
    }
}

/// Assemble the full analytics bundle from the stores.
pub async fn load_analytics(
    articles: &dyn ArticleStore,
    threats: &dyn ThreatStore,
    opts: AnalyticsOptions,
) -> Result<AnalyticsData> {
    let now = Utc::now();
    let widest = opts
        .volume_days
        .max(opts.distribution_days)
        .max(SUMMARY_WINDOW_DAYS);
    let window = articles
        .query_recent(&ArticleQuery {
            days: widest,
            limit: usize::MAX,
            ..Default::default()
        })
        .await?;
    let total = articles.count_all().await?;
    let current = threats.load_latest_threat_level().await?;
    let history = threats.threat_history(since(now, opts.timeline_days)).await?;

    Ok(AnalyticsData {
        summary: summarize(&window, total, current.as_ref(), now),
        threat_timeline: threat_timeline(&history),
        news_volume: news_volume(&window, since(now, opts.volume_days)),
        state_distribution: state_distribution(&window, since(now, opts.distribution_days)),
        category_distribution: category_distribution(
            &window,
            since(now, opts.distribution_days),
        ),
    })
}
