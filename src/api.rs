use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::{future, stream, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::analytics::{self, AnalyticsOptions};
use crate::categorize::{AuState, Category};
use crate::events::UpdateEvent;
use crate::ingest::scheduler::refresh_and_notify;
use crate::ingest::{IngestPipeline, IngestSummary};
use crate::store::{ArticleQuery, ThreatStore, DEFAULT_QUERY_DAYS, DEFAULT_QUERY_LIMIT};
use crate::threat::ThreatLevelCache;
use crate::tracker::UpdateTracker;

const THREAT_CACHE_CONTROL: &str = "public, max-age=3600, stale-while-revalidate=3600";
const THREAT_UNAVAILABLE_CACHE_CONTROL: &str = "public, max-age=300";
const ANALYTICS_CACHE_CONTROL: &str = "public, max-age=300";
const MAX_DAYS: u32 = 365;
const MAX_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub threat: ThreatLevelCache,
    pub threats: Arc<dyn ThreatStore>,
    pub tracker: UpdateTracker,
    pub heartbeat: Duration,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/threat-level", get(threat_level))
        .route("/api/news", get(news).post(refresh_news))
        .route("/api/events", get(events))
        .route("/api/analytics", get(analytics_data))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Positive integer within `1..=max`; anything else yields `fallback`.
fn parse_positive<T>(params: &HashMap<String, String>, key: &str, fallback: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    params
        .get(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default() && *v <= max)
        .unwrap_or(fallback)
}

fn error_json(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

async fn threat_level(State(state): State<AppState>) -> Response {
    match state.threat.get_threat_level().await {
        Ok(t) => ([(header::CACHE_CONTROL, THREAT_CACHE_CONTROL)], Json(t)).into_response(),
        Err(e) => {
            tracing::error!(target: "api", error = %e, "threat level unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CACHE_CONTROL, THREAT_UNAVAILABLE_CACHE_CONTROL)],
                Json(json!({ "error": "Unable to retrieve threat level at this time" })),
            )
                .into_response()
        }
    }
}

async fn news(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = ArticleQuery {
        days: parse_positive(&params, "days", DEFAULT_QUERY_DAYS, MAX_DAYS),
        limit: parse_positive(&params, "limit", DEFAULT_QUERY_LIMIT, MAX_LIMIT),
        category: params.get("category").and_then(|c| c.parse::<Category>().ok()),
        state: params.get("state").and_then(|s| s.parse::<AuState>().ok()),
    };
    match state.pipeline.store().query_recent(&query).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(target: "api", error = ?e, "article query failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load articles")
        }
    }
}

#[derive(Serialize)]
struct RefreshResp {
    status: &'static str,
    #[serde(flatten)]
    summary: IngestSummary,
}

async fn refresh_news(State(state): State<AppState>) -> Json<RefreshResp> {
    let summary = refresh_and_notify(&state.pipeline, &state.tracker).await;
    Json(RefreshResp {
        status: "ok",
        summary,
    })
}

async fn analytics_data(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let defaults = AnalyticsOptions::default();
    let opts = AnalyticsOptions {
        timeline_days: parse_positive(&params, "timelineDays", defaults.timeline_days, 365),
        volume_days: parse_positive(&params, "volumeDays", defaults.volume_days, 90),
        distribution_days: parse_positive(
            &params,
            "distributionDays",
            defaults.distribution_days,
            90,
        ),
    };
    let loaded = analytics::load_analytics(
        state.pipeline.store().as_ref(),
        state.threats.as_ref(),
        opts,
    )
    .await;
    match loaded {
        Ok(data) => ([(header::CACHE_CONTROL, ANALYTICS_CACHE_CONTROL)], Json(data)).into_response(),
        Err(e) => {
            tracing::error!(target: "api", error = ?e, "analytics failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load analytics data")
        }
    }
}

fn next_client_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(1);
    format!(
        "client-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn to_sse(ev: &UpdateEvent) -> Event {
    let data = serde_json::to_string(ev).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(ev.name()).data(data)
}

/// `connected`, then tracker events interleaved with heartbeats. The tracker
/// subscription lives inside the stream and is dropped with it.
fn event_stream(tracker: &UpdateTracker, heartbeat: Duration) -> impl Stream<Item = UpdateEvent> {
    let client_id = next_client_id();
    tracing::debug!(target: "api", %client_id, "event stream opened");

    let (tx, rx) = mpsc::unbounded_channel::<UpdateEvent>();
    let subscription = tracker.subscribe(move |ev| {
        tx.send(ev.clone())
            .map_err(|_| anyhow::anyhow!("event stream closed"))
    });

    let updates = stream::unfold((rx, subscription), |(mut rx, sub)| async move {
        rx.recv().await.map(|ev| (ev, (rx, sub)))
    });
    let start = tokio::time::Instant::now() + heartbeat;
    let heartbeats = stream::unfold(tokio::time::interval_at(start, heartbeat), |mut every| async move {
        every.tick().await;
        Some((UpdateEvent::heartbeat(), every))
    });

    stream::once(future::ready(UpdateEvent::connected(client_id)))
        .chain(stream::select(updates, heartbeats))
}

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = event_stream(&state.tracker, state.heartbeat)
        .map(|ev| Ok::<Event, Infallible>(to_sse(&ev)));
    (
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}
