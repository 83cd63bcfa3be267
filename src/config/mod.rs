// src/config/mod.rs
pub mod app;

pub use app::{AppConfig, HttpConfig, IngestConfig, StoreConfig, ThreatConfig, TrackerConfig};
