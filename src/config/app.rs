// src/config/app.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::ingest::types::SourceConfig;
use crate::threat::fetcher::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_MS, DEFAULT_THREAT_URL, DEFAULT_USER_AGENT,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";
pub const ENV_CONFIG_PATH: &str = "THREAT_MONITOR_CONFIG";

pub const ENV_THREAT_URL: &str = "THREAT_URL";
pub const ENV_STATE_DIR: &str = "STATE_DIR";
pub const ENV_INGEST_INTERVAL_SECS: &str = "INGEST_INTERVAL_SECS";
pub const ENV_POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("ABC News", "https://www.abc.net.au/news/feed/2942460/rss.xml"),
        SourceConfig::new("ABC Just In", "https://www.abc.net.au/news/feed/45910/rss.xml"),
        SourceConfig::new("SBS News", "https://www.sbs.com.au/news/topic/world/feed"),
        SourceConfig::new("The Guardian AU", "https://www.theguardian.com/australia-news/rss"),
        SourceConfig::new("SMH", "https://www.smh.com.au/rss/national.xml"),
        SourceConfig::new("9News", "https://www.9news.com.au/rss"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    pub url: String,
    pub user_agent: String,
    pub ttl_secs: u64,
    pub max_stale_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_THREAT_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ttl_secs: 60 * 60,
            max_stale_secs: 24 * 60 * 60,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("state"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 20 }
    }
}

/// Service configuration. Every section is optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<SourceConfig>,
    pub threat: ThreatConfig,
    pub tracker: TrackerConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub http: HttpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            threat: ThreatConfig::default(),
            tracker: TrackerConfig::default(),
            ingest: IngestConfig::default(),
            store: StoreConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            tracing::warn!(var = name, value = %raw, "ignoring invalid numeric override");
            None
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing app config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading app config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// `$THREAT_MONITOR_CONFIG` or `config/app.toml` (defaults if absent), then env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(ENV_CONFIG_PATH) {
            Ok(p) => Self::load_from_file(&p)?,
            Err(_) => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::load_from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(ENV_THREAT_URL) {
            if !url.trim().is_empty() {
                self.threat.url = url.trim().to_string();
            }
        }
        if let Ok(dir) = env::var(ENV_STATE_DIR) {
            if !dir.trim().is_empty() {
                self.store.dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(v) = env_u64(ENV_INGEST_INTERVAL_SECS) {
            self.ingest.interval_secs = v;
        }
        if let Some(v) = env_u64(ENV_POLL_INTERVAL_SECS) {
            self.tracker.poll_interval_secs = v;
        }
    }

    fn sanitize(&mut self) {
        self.sources
            .retain(|s| !s.name.trim().is_empty() && !s.url.trim().is_empty());
        let defaults = AppConfig::default();
        if self.threat.ttl_secs == 0 {
            self.threat.ttl_secs = defaults.threat.ttl_secs;
        }
        if self.threat.max_stale_secs < self.threat.ttl_secs {
            self.threat.max_stale_secs = self.threat.ttl_secs;
        }
        if self.threat.max_retries == 0 {
            self.threat.max_retries = 1;
        }
        if self.tracker.poll_interval_secs == 0 {
            self.tracker.poll_interval_secs = defaults.tracker.poll_interval_secs;
        }
        if self.tracker.heartbeat_secs == 0 {
            self.tracker.heartbeat_secs = defaults.tracker.heartbeat_secs;
        }
        if self.ingest.interval_secs == 0 {
            self.ingest.interval_secs = defaults.ingest.interval_secs;
        }
        if self.http.timeout_secs == 0 {
            self.http.timeout_secs = defaults.http.timeout_secs;
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.threat.ttl_secs)
    }

    pub fn max_stale(&self) -> Duration {
        Duration::from_secs(self.threat.max_stale_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.threat.retry_base_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.poll_interval_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.tracker.heartbeat_secs)
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest.interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
