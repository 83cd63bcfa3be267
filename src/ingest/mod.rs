// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::categorize::classify;
use crate::dedup::deduplicate;
use crate::ingest::types::{FeedSource, RawArticle};
use crate::relevance::RelevanceFilter;
use crate::store::ArticleStore;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_fetched_total", "Items parsed from feed sources.");
        describe_counter!(
            "ingest_relevant_total",
            "Items kept by the keyword relevance filter."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Items removed as exact-URL or near-duplicate titles."
        );
        describe_counter!(
            "ingest_inserted_total",
            "Articles newly written to the article store."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Feed source fetch/parse errors."
        );
        describe_counter!("ingest_runs_total", "Scheduled ingest cycles started.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when the ingest pipeline last ran."
        );
    });
}

/// Normalize display text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = collapse_ws(&out);

    // 5) Strip trailing sentence punctuation (keep quotes)
    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '.' | ',' | ';' | ':') {
            out.pop();
        } else {
            break;
        }
    }

    // 6) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Lowercase + whitespace collapse; the form keyword and similarity checks run on.
pub fn normalize_for_match(s: &str) -> String {
    collapse_ws(&s.to_lowercase())
}

fn collapse_ws(s: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

/// Upper bound on feeds fetched at once.
const FETCH_CONCURRENCY: usize = 6;

/// Fetch every source concurrently. A failing source is logged and
/// contributes nothing; it never cancels the others. Output keeps source order.
pub async fn fetch_all_feeds(sources: &[Arc<dyn FeedSource>]) -> Vec<RawArticle> {
    ensure_metrics_described();

    let results: Vec<_> = stream::iter(sources.iter().map(|source| async move {
        (source, source.fetch_latest().await)
    }))
    .boxed()
    .buffered(FETCH_CONCURRENCY)
    .collect()
    .await;

    let mut out = Vec::new();
    for (source, result) in results {
        match result {
            Ok(mut items) => {
                tracing::debug!(target: "ingest", source = source.name(), items = items.len(), "feed fetched");
                out.append(&mut items);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, source = source.name(), "feed source failed");
                counter!("ingest_source_errors_total").increment(1);
            }
        }
    }
    out
}

/// Outcome of one full ingestion cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub fetched: usize,
    pub relevant: usize,
    pub inserted: usize,
}

/// fetch → relevance → dedup → categorize → store.
pub struct IngestPipeline {
    sources: Vec<Arc<dyn FeedSource>>,
    relevance: RelevanceFilter,
    store: Arc<dyn ArticleStore>,
}

impl IngestPipeline {
    pub fn new(
        sources: Vec<Arc<dyn FeedSource>>,
        relevance: RelevanceFilter,
        store: Arc<dyn ArticleStore>,
    ) -> Self {
        Self {
            sources,
            relevance,
            store,
        }
    }

    pub fn sources(&self) -> &[Arc<dyn FeedSource>] {
        &self.sources
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub async fn fetch_all_feeds(&self) -> Vec<RawArticle> {
        fetch_all_feeds(&self.sources).await
    }

    /// Run one cycle. Store failures are logged and count as zero inserts.
    pub async fn refresh_all_feeds(&self) -> IngestSummary {
        let fetched = self.fetch_all_feeds().await;
        let fetched_count = fetched.len();

        let relevant = self.relevance.filter_relevant(fetched);
        let relevant_count = relevant.len();

        let deduped = deduplicate(relevant);
        let dropped_as_duplicate = relevant_count - deduped.len();
        let scraped_at = Utc::now();
        let records = deduped
            .into_iter()
            .map(|a| classify(a, scraped_at))
            .collect::<Vec<_>>();

        let inserted = if records.is_empty() {
            0
        } else {
            match self.store.insert_new_only(records).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, "article store insert failed");
                    0
                }
            }
        };

        counter!("ingest_relevant_total").increment(relevant_count as u64);
        counter!("ingest_dedup_total").increment(dropped_as_duplicate as u64);
        counter!("ingest_inserted_total").increment(inserted as u64);
        gauge!("ingest_last_run_ts").set(scraped_at.timestamp() as f64);

        let summary = IngestSummary {
            fetched: fetched_count,
            relevant: relevant_count,
            inserted,
        };
        tracing::info!(
            target: "ingest",
            fetched = summary.fetched,
            relevant = summary.relevant,
            inserted = summary.inserted,
            "ingest cycle finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        let s = "  Hello,&nbsp;&nbsp; world!!!  ";
        let out = normalize_text(s);
        assert_eq!(out, "Hello, world");
    }

    #[test]
    fn normalize_text_strips_tags_and_quotes() {
        let s = "<p>\u{201C}Stay alert\u{201D}, says <b>ASIO</b></p>";
        assert_eq!(normalize_text(s), r#""Stay alert", says ASIO"#);
    }

    #[test]
    fn normalize_for_match_lowercases_and_collapses() {
        assert_eq!(
            normalize_for_match("  Police\tARREST\n\nman  "),
            "police arrest man"
        );
    }
}
