// src/ingest/providers/mod.rs
pub mod rss;

pub use rss::{parse_feed, RssFeedSource};
