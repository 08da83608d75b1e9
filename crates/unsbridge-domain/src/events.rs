use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Severity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

// ── Drift alerts ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftEventKind {
    MetricAdded,
    MetricRemoved,
    TypeChanged,
    ValueAnomaly,
}

impl std::fmt::Display for DriftEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftEventKind::MetricAdded => "metric_added",
            DriftEventKind::MetricRemoved => "metric_removed",
            DriftEventKind::TypeChanged => "type_changed",
            DriftEventKind::ValueAnomaly => "value_anomaly",
        };
        write!(f, "{}", s)
    }
}

/// Published as JSON on `UNS/Sys/DriftAlerts/{assetId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftAlert {
    #[serde(rename = "type")]
    pub kind: DriftEventKind,
    pub asset_id: String,
    pub metric_path: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

// ── Asset lifecycle ──────────────────────────────────────────────────────────

/// Hypervisor-tracked publish liveness of an asset.
///
/// Transitions: Online → Stale (quiet past the stale threshold),
/// Stale → Offline (quiet past 3× the threshold), any → Online on publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetLifecycle {
    #[default]
    Online,
    Stale,
    Offline,
}

impl std::fmt::Display for AssetLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetLifecycle::Online => "online",
            AssetLifecycle::Stale => "stale",
            AssetLifecycle::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// Published as JSON on `UNS/Sys/Lifecycle/{assetId}` on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub state: AssetLifecycle,
    pub previous_state: AssetLifecycle,
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    pub stale_duration_seconds: i64,
}

// ── Bidirectional command path ───────────────────────────────────────────────

/// Inbound command payload received on a `…/cmd` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub value: serde_json::Value,
    pub timestamp: Option<i64>,
    pub correlation_id: String,
}

/// Ack/nack published on the command topic with `/cmd` removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub ack: bool,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckPayload {
    pub fn ok(correlation_id: impl Into<String>, timestamp: i64) -> Self {
        AckPayload {
            ack: true,
            correlation_id: correlation_id.into(),
            timestamp: Some(timestamp),
            error: None,
        }
    }

    pub fn nack(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        AckPayload {
            ack: false,
            correlation_id: correlation_id.into(),
            timestamp: None,
            error: Some(error.into()),
        }
    }
}
