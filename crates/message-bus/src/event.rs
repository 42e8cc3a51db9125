//! Notification Events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A classified panel was flagged at risk
    RiskDetected,
    /// Aggregate statistics changed for a region
    StatsUpdated,
    /// An ingest batch finished
    BatchProcessed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::RiskDetected => "RISK_DETECTED",
            NotificationKind::StatsUpdated => "STATS_UPDATED",
            NotificationKind::BatchProcessed => "BATCH_PROCESSED",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event carried from the publisher to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_id: Uuid,
    pub kind: NotificationKind,
    pub panel_id: Option<String>,
    pub subject_id: Option<String>,
    pub region: Option<String>,
    pub state: Option<String>,
    pub demographic_bucket: Option<String>,
    pub sex: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Start a new event with a fresh id and the current time
    pub fn new(kind: NotificationKind, reason: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            panel_id: None,
            subject_id: None,
            region: None,
            state: None,
            demographic_bucket: None,
            sex: None,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_panel(mut self, panel_id: impl Into<String>, subject_id: Option<String>) -> Self {
        self.panel_id = Some(panel_id.into());
        self.subject_id = subject_id;
        self
    }

    pub fn with_location(mut self, region: Option<String>, state: Option<String>) -> Self {
        self.region = region;
        self.state = state;
        self
    }

    pub fn with_demographics(mut self, bucket: Option<String>, sex: Option<String>) -> Self {
        self.demographic_bucket = bucket;
        self.sex = sex;
        self
    }
}
