//! Tracking session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Armed,
    Firing,
    Stopped,
    Interrupted,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Armed => "Armed",
            SessionState::Firing => "Firing",
            SessionState::Stopped => "Stopped",
            SessionState::Interrupted => "Interrupted",
        }
    }

    /// Whether a session in this state still holds the tracking lock.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Armed | SessionState::Firing)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Requested,
    PermissionDenied,
    StoreCorrupt,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Requested => "Requested",
            StopReason::PermissionDenied => "PermissionDenied",
            StopReason::StoreCorrupt => "StoreCorrupt",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub stop_reason: Option<StopReason>,
}

impl TrackingSession {
    pub fn begin(id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            ended_at: None,
            state: SessionState::Armed,
            stop_reason: None,
        }
    }
}
