// src/threat/fetcher.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, Url};
use serde::Deserialize;

use super::model::{Provenance, ThreatLevel};
use super::{ensure_metrics_described, ThreatError};

pub const DEFAULT_THREAT_URL: &str =
    "https://www.nationalsecurity.gov.au/national-threat-level/current-national-terrorism-threat-level";
pub const DEFAULT_USER_AGENT: &str = "TWA Threat Scraper/1.0";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Anything that can produce a fresh `ThreatLevel` reading.
#[async_trait]
pub trait ThreatSource: Send + Sync {
    async fn fetch_threat_level(&self) -> Result<ThreatLevel, ThreatError>;
}

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*\bid=['"]ThreatLevelJson['"][^>]*>(.*?)</script>"#)
        .expect("script regex")
});

static SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)\{[^{}]*"ThreatLevelNo"[^{}]*"ThreatLevelName"[^{}]*"ThreatLevelDesc"[^{}]*"ThreatLevelLink"[^{}]*\}"#,
    )
    .expect("shape regex")
});

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LevelField {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct RawThreatLevel {
    #[serde(rename = "ThreatLevelNo")]
    level: LevelField,
    #[serde(rename = "ThreatLevelName")]
    name: String,
    #[serde(rename = "ThreatLevelDesc")]
    description: String,
    #[serde(rename = "ThreatLevelLink")]
    link: String,
}

fn extract_json(html: &str) -> Result<&str, ThreatError> {
    if let Some(body) = SCRIPT_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
    {
        return Ok(body);
    }
    SHAPE_RE
        .find(html)
        .map(|m| m.as_str().trim())
        .ok_or_else(|| ThreatError::Extraction("no ThreatLevelJson block in page".into()))
}

/// Extract, unescape and validate the embedded threat record from `html`.
/// A relative link is resolved against `page_url`.
pub fn parse_threat_html(
    html: &str,
    page_url: &str,
    fetched_at: DateTime<Utc>,
) -> Result<ThreatLevel, ThreatError> {
    let json = html_escape::decode_html_entities(extract_json(html)?).into_owned();
    let raw: RawThreatLevel =
        serde_json::from_str(&json).map_err(|e| ThreatError::Validation(e.to_string()))?;

    let level = match raw.level {
        LevelField::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ThreatError::Validation(format!("ThreatLevelNo `{s}` is not numeric")))?,
        LevelField::Number(n) => n,
    };
    if !ThreatLevel::is_valid_level(level) {
        return Err(ThreatError::Validation(format!(
            "ThreatLevelNo {level} outside 1..=5"
        )));
    }

    let base = Url::parse(page_url)
        .map_err(|e| ThreatError::Internal(format!("bad threat page url: {e}")))?;
    let link = base
        .join(raw.link.trim())
        .map_err(|e| ThreatError::Validation(format!("ThreatLevelLink: {e}")))?;

    Ok(ThreatLevel {
        level: level as u8,
        name: raw.name.trim().to_uppercase(),
        description: raw.description.trim().to_string(),
        link: link.to_string(),
        fetched_at,
        provenance: Provenance::Scraped,
    })
}

/// Fetches the threat page with bounded retries and parses the embedded record.
#[derive(Clone)]
pub struct ThreatLevelFetcher {
    url: String,
    client: Client,
    max_retries: u32,
    retry_base: Duration,
}

impl ThreatLevelFetcher {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
        }
    }

    /// Client with the scraper user agent and a request timeout.
    pub fn build_client(user_agent: &str, timeout: Duration) -> anyhow::Result<Client> {
        Ok(Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()?)
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_once(&self) -> Result<String, ThreatError> {
        counter!("threat_fetch_attempts_total").increment(1);
        let rsp = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| ThreatError::Http(e.to_string()))?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(ThreatError::Status(status.as_u16()));
        }
        rsp.text().await.map_err(|e| ThreatError::Http(e.to_string()))
    }

    /// GET with exponential backoff (`base << (attempt - 1)`); the last error propagates.
    pub async fn fetch_html(&self) -> Result<String, ThreatError> {
        ensure_metrics_described();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once().await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    if attempt < self.max_retries && e.is_retryable() {
                        let backoff = self.retry_base * (1u32 << (attempt - 1));
                        tracing::warn!(
                            target: "threat",
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "threat page fetch failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    counter!("threat_fetch_failures_total").increment(1);
                    tracing::error!(target: "threat", attempt, error = %e, "threat page fetch failed");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl ThreatSource for ThreatLevelFetcher {
    async fn fetch_threat_level(&self) -> Result<ThreatLevel, ThreatError> {
        let html = self.fetch_html().await?;
        parse_threat_html(&html, &self.url, Utc::now())
    }
}
