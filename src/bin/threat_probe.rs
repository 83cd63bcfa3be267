//! Fetch the current threat level once and print it as JSON.
//! Uses the same config file and env overrides as the service.

use threat_monitor::config::AppConfig;
use threat_monitor::threat::{ThreatLevelFetcher, ThreatSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = AppConfig::load()?;
    let client = ThreatLevelFetcher::build_client(&cfg.threat.user_agent, cfg.http_timeout())?;
    let fetcher = ThreatLevelFetcher::new(cfg.threat.url.clone(), client)
        .with_retries(cfg.threat.max_retries)
        .with_retry_base(cfg.retry_base());

    let reading = fetcher.fetch_threat_level().await?;
    println!("{}", serde_json::to_string_pretty(&reading)?);
    Ok(())
}
