// src/relevance.rs
//! Keyword relevance gate for feed items.
//!
//! Two keyword tiers: `primary` (terrorism / national-security terms) and
//! `secondary` (general crime and safety terms, kept for broader recall).
//! A single hit in either tier keeps the item; there is no scoring.
//!
//! Keywords match as substrings of lowercased, whitespace-collapsed
//! `title + content`, so "terrorism" also catches "counterterrorism". Short
//! single-word acronyms (`isis`, `afp`, `asio`) need whole-word matches so
//! that "isis" does not fire inside "crisis".

use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::ingest::normalize_for_match;
use crate::ingest::types::RawArticle;

// --- env defaults & names ---
pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";

pub const PRIMARY_KEYWORDS: &[&str] = &[
    "terrorism",
    "terrorist",
    "terror attack",
    "asio",
    "national security",
    "threat level",
    "extremist",
    "extremism",
    "radicalisation",
    "bomb threat",
    "explosive",
    "hostage",
    "security threat",
    "counter-terrorism",
    "counter terrorism",
    "islamic state",
    "isis",
    "al-qaeda",
    "afp",
    "australian federal police",
    "security alert",
    "security warning",
];

pub const SECONDARY_KEYWORDS: &[&str] = &[
    "police",
    "crime",
    "arrest",
    "attack",
    "shooting",
    "stabbing",
    "incident",
    "emergency",
    "security",
    "safety",
    "warning",
    "alert",
    "investigation",
    "suspect",
    "detained",
    "charged",
    "court",
    "threat",
    "dangerous",
    "manhunt",
    "lockdown",
    "evacuation",
];

// Dev logging gate: THREAT_MONITOR_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("THREAT_MONITOR_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Which keyword list produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordHit {
    pub keyword: String,
    pub tier: Tier,
}

/// Optional TOML override for the keyword lists.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordConfig {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
}

/// Keywords this short, without spaces, are matched as whole words.
const ACRONYM_MAX_LEN: usize = 4;

fn keyword_pattern(keyword: &str) -> String {
    let escaped = regex::escape(keyword);
    if keyword.len() <= ACRONYM_MAX_LEN && !keyword.contains(' ') {
        format!(r"\b{escaped}\b")
    } else {
        escaped
    }
}

#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    primary: Vec<String>,
    re: Regex,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        let primary = PRIMARY_KEYWORDS.iter().map(|s| s.to_string()).collect();
        let secondary = SECONDARY_KEYWORDS.iter().map(|s| s.to_string()).collect();
        Self::new(primary, secondary).expect("built-in keyword lists compile")
    }
}

impl RelevanceFilter {
    pub fn new(primary: Vec<String>, secondary: Vec<String>) -> anyhow::Result<Self> {
        let clean = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|k| normalize_for_match(&k))
                .filter(|k| !k.is_empty())
                .collect()
        };
        let primary = clean(primary);
        let secondary = clean(secondary);
        if primary.is_empty() && secondary.is_empty() {
            anyhow::bail!("relevance filter needs at least one keyword");
        }

        let alternation = primary
            .iter()
            .chain(secondary.iter())
            .map(|k| keyword_pattern(k))
            .collect::<Vec<_>>()
            .join("|");
        let re = Regex::new(&format!("(?:{alternation})"))
            .map_err(|e| anyhow::anyhow!("keyword regex error: {e}"))?;

        Ok(Self { primary, re })
    }

    /// Load from a TOML string (`primary = [..]`, `secondary = [..]`).
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: KeywordConfig = toml::from_str(toml_str)?;
        Self::new(cfg.primary, cfg.secondary)
    }

    /// Uses RELEVANCE_CONFIG_PATH or "config/relevance.toml"; built-in lists if absent.
    pub fn from_toml() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_RELEVANCE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH));

        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read relevance config at {}: {}",
                path.display(),
                e
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// First keyword hit in already-normalized text, if any.
    pub fn evaluate(&self, normalized: &str) -> Option<KeywordHit> {
        let m = self.re.find(normalized)?;
        let keyword = m.as_str().to_string();
        let tier = if self.primary.iter().any(|k| *k == keyword) {
            Tier::Primary
        } else {
            Tier::Secondary
        };
        Some(KeywordHit { keyword, tier })
    }

    pub fn is_relevant(&self, article: &RawArticle) -> bool {
        let haystack = normalize_for_match(&format!(
            "{} {}",
            article.title, article.content_normalized
        ));
        match self.evaluate(&haystack) {
            Some(_) => true,
            None => {
                if dev_logging_enabled() {
                    let id = anon_hash(&haystack);
                    // Never log raw text. Only hashed id + source.
                    info!(target: "relevance", %id, source = %article.source_name, "dropped: no keyword");
                }
                false
            }
        }
    }

    pub fn filter_relevant(&self, articles: Vec<RawArticle>) -> Vec<RawArticle> {
        articles.into_iter().filter(|a| self.is_relevant(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(title: &str, content: &str) -> RawArticle {
        RawArticle {
            title: title.into(),
            url: "https://example.com/x".into(),
            content_normalized: content.into(),
            published_at: Utc::now(),
            source_name: "Test".into(),
        }
    }

    #[test]
    fn primary_and_secondary_hits() {
        let f = RelevanceFilter::default();
        let hit = f.evaluate("asio raises the national threat level").unwrap();
        assert_eq!(hit.keyword, "asio");
        assert_eq!(hit.tier, Tier::Primary);

        let hit = f.evaluate("man arrested after brawl").unwrap();
        assert_eq!(hit.keyword, "arrest");
        assert_eq!(hit.tier, Tier::Secondary);
    }

    #[test]
    fn short_acronyms_need_whole_words() {
        let f = RelevanceFilter::default();
        assert!(f.evaluate("housing crisis deepens").is_none());
        assert!(f.evaluate("giraffe born at the zoo").is_none());
        assert_eq!(f.evaluate("afp officers on scene").unwrap().keyword, "afp");
    }

    #[test]
    fn keywords_match_inside_compound_words() {
        let f = RelevanceFilter::default();
        let hit = f.evaluate("counterterrorism raids across melbourne").unwrap();
        assert_eq!(hit.keyword, "terrorism");
        assert_eq!(hit.tier, Tier::Primary);

        assert_eq!(
            f.evaluate("major cyberattack hits hospital").unwrap().keyword,
            "attack"
        );
        assert!(f.evaluate("antiterrorism laws pass").is_some());
    }

    #[test]
    fn title_and_content_both_count() {
        let f = RelevanceFilter::default();
        assert!(f.is_relevant(&article("Quiet weekend", "police closed the road")));
        assert!(f.is_relevant(&article("Terror Attack foiled", "")));
        assert!(!f.is_relevant(&article("Cricket scores", "australia won by six wickets")));
    }

    #[test]
    fn toml_override_replaces_lists() {
        let f = RelevanceFilter::from_toml_str(
            r#"
primary = ["Drone Strike"]
secondary = []
"#,
        )
        .unwrap();
        assert_eq!(
            f.evaluate("reports of a drone strike").map(|h| h.tier),
            Some(Tier::Primary)
        );
        assert!(f.evaluate("police arrest man").is_none());
    }

    #[test]
    fn empty_keyword_lists_are_rejected() {
        assert!(RelevanceFilter::from_toml_str("primary = []").is_err());
    }

    #[test]
    fn anon_hash_is_short_hex() {
        let h = anon_hash("some text");
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
