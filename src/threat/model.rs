// src/threat/model.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 5;

/// How a reading reached the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Fetched from the threat page during this call.
    Scraped,
    /// Served from the in-memory cache within its TTL.
    Cache,
    /// Read from persistence (fresh second-tier hit, or outage fallback).
    Database,
    /// Stale in-memory value served because the live fetch failed.
    Fallback,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Scraped => "scraped",
            Provenance::Cache => "cache",
            Provenance::Database => "database",
            Provenance::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatLevel {
    /// Always within 1..=5.
    pub level: u8,
    pub name: String,
    pub description: String,
    /// Absolute URL.
    pub link: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(rename = "source")]
    pub provenance: Provenance,
}

impl ThreatLevel {
    pub fn is_valid_level(level: i64) -> bool {
        (MIN_LEVEL as i64..=MAX_LEVEL as i64).contains(&level)
    }

    /// Change detection compares only what the reading says, never how it was obtained.
    pub fn same_reading(&self, other: &ThreatLevel) -> bool {
        self.level == other.level
            && self.name == other.name
            && self.description == other.description
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// The single in-memory cache slot owned by `ThreatLevelCache`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: ThreatLevel,
    pub cached_at: DateTime<Utc>,
}
