// tests/tracker_events.rs
mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use common::FakeThreatSource;

use threat_monitor::categorize::Category;
use threat_monitor::events::{EventKind, UpdateEvent};
use threat_monitor::store::{ArticleStore, MemoryStore, StoredArticle};
use threat_monitor::threat::{CacheConfig, ThreatLevelCache};
use threat_monitor::tracker::UpdateTracker;

fn article(url: &str, title: &str, minutes_ago: i64) -> StoredArticle {
    let now = Utc::now();
    StoredArticle {
        title: title.into(),
        url: url.into(),
        content_normalized: String::new(),
        published_at: now - chrono::Duration::minutes(minutes_ago),
        source_name: "Test".into(),
        category: Category::General,
        state: None,
        scraped_at: now,
    }
}

struct Harness {
    tracker: UpdateTracker,
    source: Arc<FakeThreatSource>,
    articles: Arc<MemoryStore>,
}

fn harness(poll: Duration) -> Harness {
    let source = FakeThreatSource::new(Some(3));
    let articles = Arc::new(MemoryStore::new());
    let cache = ThreatLevelCache::new(
        source.clone(),
        Arc::new(MemoryStore::new()),
        CacheConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        },
    );
    Harness {
        tracker: UpdateTracker::new(cache, articles.clone(), poll),
        source,
        articles,
    }
}

fn collect(tracker: &UpdateTracker) -> (Arc<Mutex<Vec<UpdateEvent>>>, threat_monitor::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = tracker.subscribe(move |ev| {
        sink.lock().unwrap().push(ev.clone());
        Ok(())
    });
    (seen, sub)
}

async fn wait_for_cycles(tracker: &UpdateTracker, n: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tracker.poll_cycles() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller did not run");
}

#[tokio::test]
async fn no_subscribers_means_no_polling() {
    let h = harness(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.tracker.poll_cycles(), 0);
    assert_eq!(h.source.calls(), 0);
    assert!(!h.tracker.is_polling());
}

#[tokio::test]
async fn first_subscriber_triggers_immediate_check_and_last_one_stops_it() {
    let h = harness(Duration::from_secs(3600));
    let (_seen, sub) = collect(&h.tracker);
    wait_for_cycles(&h.tracker, 1).await;
    assert!(h.tracker.is_polling());

    sub.unsubscribe();
    assert!(!h.tracker.is_polling());
    let cycles = h.tracker.poll_cycles();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.tracker.poll_cycles(), cycles);
}

#[tokio::test]
async fn interval_keeps_polling_while_subscribed() {
    let h = harness(Duration::from_millis(20));
    let (_seen, _sub) = collect(&h.tracker);
    wait_for_cycles(&h.tracker, 3).await;
}

#[tokio::test]
async fn threat_change_is_broadcast_with_previous_level() {
    let h = harness(Duration::from_secs(3600));
    let (seen, _sub) = collect(&h.tracker);
    wait_for_cycles(&h.tracker, 1).await;
    assert!(seen.lock().unwrap().is_empty(), "first observation only seeds");

    h.source.set_level(Some(4));
    h.tracker.check_for_updates().await;

    let events = seen.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].kind,
        EventKind::ThreatUpdate {
            level: 4,
            name: "EXPECTED".into(),
            previous_level: Some(3)
        }
    );
}

#[tokio::test]
async fn news_increase_reports_delta_and_newest_title() {
    let h = harness(Duration::from_secs(3600));
    h.articles
        .insert_new_only(vec![article("u0", "Older story", 120)])
        .await
        .unwrap();

    let (seen, _sub) = collect(&h.tracker);
    wait_for_cycles(&h.tracker, 1).await;

    h.articles
        .insert_new_only(vec![
            article("u1", "Raid in Darwin", 30),
            article("u2", "Newest: police appeal", 1),
        ])
        .await
        .unwrap();
    h.tracker.check_for_updates().await;

    let events = seen.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].kind,
        EventKind::NewsUpdate {
            count: 2,
            latest_title: Some("Newest: police appeal".into())
        }
    );

    // unchanged count: nothing more
    h.tracker.check_for_updates().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn manual_notifications_reach_every_subscriber() {
    let h = harness(Duration::from_secs(3600));
    let (a, _sa) = collect(&h.tracker);
    let (b, _sb) = collect(&h.tracker);

    h.tracker.notify_news_update(3, None);
    h.tracker.notify_threat_update(5, "CERTAIN", Some(4));

    for seen in [a, b] {
        let names: Vec<&str> = seen.lock().unwrap().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["news-update", "threat-update"]);
    }
}
