// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::{IngestPipeline, IngestSummary};
use crate::store::ArticleQuery;
use crate::tracker::UpdateTracker;

/// Run one ingest cycle and push a `news-update` when anything new was stored.
pub async fn refresh_and_notify(pipeline: &IngestPipeline, tracker: &UpdateTracker) -> IngestSummary {
    let summary = pipeline.refresh_all_feeds().await;
    if summary.inserted > 0 {
        let newest = ArticleQuery {
            days: 1,
            limit: 1,
            ..Default::default()
        };
        let latest_title = match pipeline.store().query_recent(&newest).await {
            Ok(rows) => rows.into_iter().next().map(|a| a.title),
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, "latest article lookup failed");
                None
            }
        };
        tracker.notify_news_update(summary.inserted, latest_title);
    }
    summary
}

/// Periodic ingestion; the first cycle runs immediately.
pub fn spawn_ingest_scheduler(
    pipeline: Arc<IngestPipeline>,
    tracker: UpdateTracker,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            counter!("ingest_runs_total").increment(1);
            let summary = refresh_and_notify(&pipeline, &tracker).await;
            tracing::debug!(
                target: "ingest",
                fetched = summary.fetched,
                inserted = summary.inserted,
                "scheduled ingest tick"
            );
        }
    })
}
