// src/categorize.rs
//! Category and state tagging for relevant articles.
//!
//! Both lookups are ordered and first-match-wins over the normalized
//! `title + content` text. Category patterns are plain substrings (so
//! "charged" and "sentenced" hit on their own); state keywords must match
//! whole words, otherwise "wa" would fire on "was".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ingest::normalize_for_match;
use crate::ingest::types::RawArticle;
use crate::store::StoredArticle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Incident,
    Arrest,
    Policy,
    Community,
    General,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Incident,
        Category::Arrest,
        Category::Policy,
        Category::Community,
        Category::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Incident => "incident",
            Category::Arrest => "arrest",
            Category::Policy => "policy",
            Category::Community => "community",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown category `{s}`"))
    }
}

/// Australian states and territories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuState {
    Nsw,
    Vic,
    Qld,
    Wa,
    Sa,
    Tas,
    Nt,
    Act,
}

impl AuState {
    /// Lookup order matters: first state with a keyword hit wins.
    pub const ALL: [AuState; 8] = [
        AuState::Nsw,
        AuState::Vic,
        AuState::Qld,
        AuState::Wa,
        AuState::Sa,
        AuState::Tas,
        AuState::Nt,
        AuState::Act,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuState::Nsw => "NSW",
            AuState::Vic => "VIC",
            AuState::Qld => "QLD",
            AuState::Wa => "WA",
            AuState::Sa => "SA",
            AuState::Tas => "TAS",
            AuState::Nt => "NT",
            AuState::Act => "ACT",
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            AuState::Nsw => &["nsw", "new south wales", "sydney", "wollongong", "newcastle"],
            AuState::Vic => &["vic", "victoria", "melbourne", "geelong"],
            AuState::Qld => &["qld", "queensland", "brisbane", "gold coast", "cairns"],
            AuState::Wa => &["wa", "western australia", "perth"],
            AuState::Sa => &["sa", "south australia", "adelaide"],
            AuState::Tas => &["tas", "tasmania", "hobart"],
            AuState::Nt => &["nt", "northern territory", "darwin", "alice springs"],
            AuState::Act => &["act", "canberra", "australian capital territory"],
        }
    }
}

impl fmt::Display for AuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuState::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown state `{s}`"))
    }
}

static CATEGORY_RULES: Lazy<Vec<(Category, Regex)>> = Lazy::new(|| {
    [
        (
            Category::Arrest,
            r"arrest|charged|custody|court|bail|sentenced|detained",
        ),
        (
            Category::Incident,
            r"attack|bomb|explosion|stabbing|shooting|hostage|incident|plot|attempted|device",
        ),
        (
            Category::Policy,
            r"policy|law|bill|legislation|government|minister|parliament|strategy",
        ),
        (
            Category::Community,
            r"community|awareness|safety|campaign|program|training|outreach|education",
        ),
    ]
    .into_iter()
    .map(|(c, p)| (c, Regex::new(p).expect("category regex")))
    .collect()
});

static STATE_RULES: Lazy<Vec<(AuState, Regex)>> = Lazy::new(|| {
    AuState::ALL
        .into_iter()
        .map(|st| {
            let alternation = st
                .keywords()
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"\b(?:{alternation})\b")).expect("state regex");
            (st, re)
        })
        .collect()
});

fn haystack(title: &str, content: &str) -> String {
    normalize_for_match(&format!("{title} {content}"))
}

/// Total and deterministic: anything unmatched is `General`.
pub fn categorize(title: &str, content: &str) -> Category {
    let text = haystack(title, content);
    CATEGORY_RULES
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(c, _)| *c)
        .unwrap_or(Category::General)
}

pub fn extract_state(title: &str, content: &str) -> Option<AuState> {
    let text = haystack(title, content);
    STATE_RULES
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(st, _)| *st)
}

/// Turn a relevant, deduplicated feed item into a store record.
pub fn classify(article: RawArticle, scraped_at: DateTime<Utc>) -> StoredArticle {
    let category = categorize(&article.title, &article.content_normalized);
    let state = extract_state(&article.title, &article.content_normalized);
    StoredArticle {
        title: article.title,
        url: article.url,
        content_normalized: article.content_normalized,
        published_at: article.published_at,
        source_name: article.source_name,
        category,
        state,
        scraped_at,
    }
}
