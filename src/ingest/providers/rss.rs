// src/ingest/providers/rss.rs
//! Generic RSS 2.0 / Atom provider. One instance per configured source.
//!
//! Items without a link (or guid) are dropped. Missing or unparsable
//! publication dates fall back to the fetch time.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{FeedSource, RawArticle, SourceConfig};
use crate::ingest::{normalize_for_match, normalize_text};

const UNTITLED: &str = "Untitled";

/* ----------------------------
RSS 2.0
---------------------------- */

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/* ----------------------------
Atom
---------------------------- */

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    id: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element whose text we want regardless of its attributes
/// (`<guid isPermaLink="false">`, `<title type="html">`).
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}

/// Local name of the document's first element, lowercased (`rss`, `feed`, ...).
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase())
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn build_article(
    source_name: &str,
    title: Option<&str>,
    url: Option<String>,
    body: &[Option<&str>],
    published_at: Option<DateTime<Utc>>,
    fetched_at: DateTime<Utc>,
) -> Option<RawArticle> {
    let url = url?;
    let title = title.map(normalize_text).unwrap_or_default();
    let joined = body
        .iter()
        .flatten()
        .copied()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some(RawArticle {
        title: if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title
        },
        url,
        content_normalized: normalize_for_match(&normalize_text(&joined)),
        published_at: published_at.unwrap_or(fetched_at),
        source_name: source_name.to_string(),
    })
}

fn parse_rss(source_name: &str, xml: &str, fetched_at: DateTime<Utc>) -> Result<Vec<RawArticle>> {
    let rss: Rss = from_str(xml).with_context(|| format!("parsing rss xml for {source_name}"))?;
    Ok(rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let url = non_empty(it.link.as_deref())
                .or_else(|| non_empty(it.guid.as_ref().map(|g| g.value.as_str())));
            build_article(
                source_name,
                it.title.as_deref(),
                url,
                &[it.description.as_deref()],
                it.pub_date.as_deref().and_then(parse_rfc2822),
                fetched_at,
            )
        })
        .collect())
}

fn parse_atom(source_name: &str, xml: &str, fetched_at: DateTime<Utc>) -> Result<Vec<RawArticle>> {
    let feed: AtomFeed =
        from_str(xml).with_context(|| format!("parsing atom xml for {source_name}"))?;
    Ok(feed
        .entry
        .into_iter()
        .filter_map(|e| {
            let alternate = e
                .link
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| e.link.first())
                .and_then(|l| non_empty(l.href.as_deref()));
            let url = alternate.or_else(|| non_empty(e.id.as_deref()));
            let published = e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_rfc3339);
            build_article(
                source_name,
                e.title.as_ref().map(|t| t.value.as_str()),
                url,
                &[
                    e.summary.as_ref().map(|t| t.value.as_str()),
                    e.content.as_ref().map(|t| t.value.as_str()),
                ],
                published,
                fetched_at,
            )
        })
        .collect())
}

/// Parse an RSS 2.0 or Atom document into normalized articles.
pub fn parse_feed(source_name: &str, xml: &str, fetched_at: DateTime<Utc>) -> Result<Vec<RawArticle>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);

    let out = match root_element(&xml_clean).as_deref() {
        Some("rss") => parse_rss(source_name, &xml_clean, fetched_at)?,
        Some("feed") => parse_atom(source_name, &xml_clean, fetched_at)?,
        Some(other) => return Err(anyhow!("unsupported feed root element <{other}>")),
        None => return Err(anyhow!("feed body from {source_name} is not xml")),
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_fetched_total").increment(out.len() as u64);
    Ok(out)
}

pub struct RssFeedSource {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFeedSource {
    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Http {
                url: url.into(),
                client,
            },
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Self {
        Self::from_url(cfg.name.clone(), cfg.url.clone(), client)
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_latest(&self) -> Result<Vec<RawArticle>> {
        let fetched_at = Utc::now();
        match &self.mode {
            Mode::Fixture(s) => parse_feed(&self.name, s, fetched_at),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url.as_str())
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.name))?
                    .error_for_status()
                    .with_context(|| format!("{} http status", self.name))?;
                let body = resp
                    .text()
                    .await
                    .with_context(|| format!("{} http .text()", self.name))?;
                parse_feed(&self.name, &body, fetched_at)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// quick-xml only knows the five XML entities; feeds routinely use HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
