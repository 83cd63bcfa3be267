// src/events.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// Payload of an update event. Serialized as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    ThreatUpdate {
        level: u8,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_level: Option<u8>,
    },
    #[serde(rename_all = "camelCase")]
    NewsUpdate {
        count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        latest_title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        #[serde(serialize_with = "iso_millis")]
        server_time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Connected { client_id: String },
}

impl EventKind {
    /// Wire name, also used as the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ThreatUpdate { .. } => "threat-update",
            EventKind::NewsUpdate { .. } => "news-update",
            EventKind::Heartbeat { .. } => "heartbeat",
            EventKind::Connected { .. } => "connected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(serialize_with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl UpdateEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn threat_update(level: u8, name: impl Into<String>, previous_level: Option<u8>) -> Self {
        Self::now(EventKind::ThreatUpdate {
            level,
            name: name.into(),
            previous_level,
        })
    }

    pub fn news_update(count: usize, latest_title: Option<String>) -> Self {
        Self::now(EventKind::NewsUpdate {
            count,
            latest_title,
        })
    }

    pub fn heartbeat() -> Self {
        let now = Utc::now();
        Self {
            kind: EventKind::Heartbeat { server_time: now },
            timestamp: now,
        }
    }

    pub fn connected(client_id: impl Into<String>) -> Self {
        Self::now(EventKind::Connected {
            client_id: client_id.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

fn iso_millis<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
