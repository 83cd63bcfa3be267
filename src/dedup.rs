// src/dedup.rs
//! Story-level deduplication for one ingestion batch.
//!
//! An item is dropped when its URL was already accepted, or when its
//! normalized title is more than [`TITLE_SIMILARITY_THRESHOLD`] similar to any
//! accepted title. Similarity is `1 - levenshtein(a, b) / max(len(a), len(b))`
//! over characters. Pairwise, so O(n²) in the batch size; batches are tens of
//! items.

use std::collections::HashSet;

use strsim::levenshtein;

use crate::ingest::normalize_for_match;
use crate::ingest::types::RawArticle;

pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.90;

/// Edit-distance similarity in [0.0, 1.0]; empty input scores 0.
pub fn title_similarity(first: &str, second: &str) -> f64 {
    let a = normalize_for_match(first);
    let b = normalize_for_match(second);
    let max_len = a.chars().count().max(b.chars().count());
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Keep the first occurrence of every story, preserving input order.
pub fn deduplicate(articles: Vec<RawArticle>) -> Vec<RawArticle> {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut accepted: Vec<RawArticle> = Vec::with_capacity(articles.len());
    let mut accepted_titles: Vec<String> = Vec::with_capacity(articles.len());

    for article in articles {
        if seen_urls.contains(&article.url) {
            tracing::trace!(target: "ingest", url = %article.url, "duplicate url");
            continue;
        }
        let title = normalize_for_match(&article.title);
        let near_duplicate = accepted_titles
            .iter()
            .any(|existing| title_similarity(existing, &title) > TITLE_SIMILARITY_THRESHOLD);
        if near_duplicate {
            tracing::trace!(target: "ingest", url = %article.url, "near-duplicate title");
            continue;
        }

        seen_urls.insert(article.url.clone());
        accepted_titles.push(title);
        accepted.push(article);
    }

    accepted
}
