// src/threat/mod.rs
//! National threat level: page scraping, validation and a layered cache.

pub mod cache;
pub mod fetcher;
pub mod model;

pub use cache::{CacheConfig, ThreatLevelCache};
pub use fetcher::{parse_threat_html, ThreatLevelFetcher, ThreatSource};
pub use model::{CacheEntry, Provenance, ThreatLevel};

use metrics::describe_counter;
use once_cell::sync::OnceCell;

/// Errors on the threat-level path. Cloneable so one refresh outcome can be
/// handed to every waiter of a single-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreatError {
    #[error("threat page request failed: {0}")]
    Http(String),
    #[error("threat page returned HTTP {0}")]
    Status(u16),
    #[error("threat level JSON not found: {0}")]
    Extraction(String),
    #[error("threat level JSON invalid: {0}")]
    Validation(String),
    #[error("threat level unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ThreatError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ThreatError::Http(_) | ThreatError::Status(_))
    }
}

pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "threat_fetch_attempts_total",
            "HTTP attempts made against the threat-level page"
        );
        describe_counter!(
            "threat_fetch_failures_total",
            "Threat-level fetches that failed after all retries"
        );
        describe_counter!(
            "threat_served_total",
            "Threat-level answers served, labelled by provenance"
        );
    });
}
