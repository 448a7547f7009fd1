use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::{SessionState, StopReason, StoreError, TrackingSession},
    location::LocationError,
};

/// Last failure shown to the user, flattened from the location and store taxonomies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LastError {
    Timeout,
    Unavailable,
    PermissionDenied,
    WriteFailed,
    Corrupt,
}

impl From<LocationError> for LastError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::Timeout => LastError::Timeout,
            LocationError::Unavailable => LastError::Unavailable,
            LocationError::PermissionDenied => LastError::PermissionDenied,
        }
    }
}

impl From<&StoreError> for LastError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::Corrupt(_) => LastError::Corrupt,
            _ => LastError::WriteFailed,
        }
    }
}

/// Snapshot handed to the notification sink and returned by `current_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    pub session_state: SessionState,
    pub session_id: Option<String>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub stop_reason: Option<StopReason>,
    pub consecutive_denials: u32,
    pub samples_recorded: u64,
}

/// A stop that has happened in memory but is not yet persisted or announced.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingClose {
    pub session: TrackingSession,
    pub persisted: bool,
    pub published: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    pub session: Option<TrackingSession>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub consecutive_denials: u32,
    pub samples_recorded: u64,
    /// Monotonic time carried over from an earlier process; combines with
    /// `running_anchor` to give a sample's session-relative timestamp.
    pub monotonic_baseline_ms: u64,
    pub running_anchor: Option<Instant>,
    /// Highest monotonic timestamp handed out, so samples never step backwards.
    pub last_monotonic_ms: u64,
    pub pending_close: Option<PendingClose>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.session_state().is_active()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.id.as_str())
    }

    pub fn begin_session(&mut self, session: TrackingSession, now: Instant) {
        *self = Self {
            session: Some(session),
            running_anchor: Some(now),
            ..Self::default()
        };
    }

    /// Adopts a session left armed by a previous process. The monotonic clock picks up
    /// from the last committed sample.
    pub fn resume_session(
        &mut self,
        mut session: TrackingSession,
        last_sample_at: Option<DateTime<Utc>>,
        baseline_ms: u64,
        now: Instant,
    ) {
        session.state = SessionState::Armed;
        *self = Self {
            session: Some(session),
            last_sample_at,
            monotonic_baseline_ms: baseline_ms,
            running_anchor: Some(now),
            last_monotonic_ms: baseline_ms,
            ..Self::default()
        };
    }

    pub fn set_phase(&mut self, state: SessionState) {
        if let Some(session) = self.session.as_mut() {
            if session.state.is_active() {
                session.state = state;
            }
        }
    }

    /// Session-relative timestamp for the next sample. Never decreases.
    pub fn next_monotonic_ms(&mut self) -> u64 {
        let elapsed = self
            .running_anchor
            .map(|anchor| anchor.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let candidate = self.monotonic_baseline_ms.saturating_add(elapsed);
        self.last_monotonic_ms = self.last_monotonic_ms.max(candidate);
        self.last_monotonic_ms
    }

    pub fn record_sample(&mut self, at: DateTime<Utc>) {
        self.last_sample_at = Some(at);
        self.last_error = None;
        self.consecutive_denials = 0;
        self.samples_recorded = self.samples_recorded.saturating_add(1);
    }

    /// Returns the new consecutive-denial count.
    pub fn record_location_error(&mut self, err: LocationError) -> u32 {
        self.last_error = Some(err.into());
        if err == LocationError::PermissionDenied {
            self.consecutive_denials = self.consecutive_denials.saturating_add(1);
        } else {
            self.consecutive_denials = 0;
        }
        self.consecutive_denials
    }

    pub fn record_store_error(&mut self, err: &StoreError) {
        self.last_error = Some(err.into());
        self.consecutive_denials = 0;
    }

    /// Moves an active session to `Stopped` and queues its close. Returns the session
    /// only when this call performed the transition.
    pub fn stop(&mut self, reason: StopReason, at: DateTime<Utc>) -> Option<TrackingSession> {
        let session = self.session.as_mut()?;
        if !session.state.is_active() {
            return None;
        }
        session.state = SessionState::Stopped;
        session.stop_reason = Some(reason);
        session.ended_at = Some(at);
        self.running_anchor = None;

        let stopped = session.clone();
        self.pending_close = Some(PendingClose {
            session: stopped.clone(),
            persisted: false,
            published: false,
        });
        Some(stopped)
    }

    pub fn mark_persisted(&mut self, session_id: &str) {
        if let Some(pending) = self.pending_for(session_id) {
            pending.persisted = true;
        }
        self.clear_settled();
    }

    pub fn mark_published(&mut self, session_id: &str) {
        if let Some(pending) = self.pending_for(session_id) {
            pending.published = true;
        }
        self.clear_settled();
    }

    fn pending_for(&mut self, session_id: &str) -> Option<&mut PendingClose> {
        self.pending_close
            .as_mut()
            .filter(|pending| pending.session.id == session_id)
    }

    fn clear_settled(&mut self) {
        if self
            .pending_close
            .as_ref()
            .is_some_and(|pending| pending.persisted && pending.published)
        {
            self.pending_close = None;
        }
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            session_state: self.session_state(),
            session_id: self.session_id().map(str::to_string),
            last_sample_at: self.last_sample_at,
            last_error: self.last_error,
            stop_reason: self.session.as_ref().and_then(|session| session.stop_reason),
            consecutive_denials: self.consecutive_denials,
            samples_recorded: self.samples_recorded,
        }
    }
}
