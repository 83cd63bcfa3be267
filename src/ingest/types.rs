// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured external feed (`name` is shown to users, `url` is fetched).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// One normalized feed item, before classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub title: String,
    pub url: String,
    /// Lowercased, whitespace-collapsed body text (description/summary/content).
    pub content_normalized: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawArticle>>;
    fn name(&self) -> &str;
}
