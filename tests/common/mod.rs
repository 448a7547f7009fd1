//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use blo_tracker_lib::{
    db::{Database, Sample, SampleTimestamp, SessionState, StopReason, StoreError, TrackingSession, TrackingStore},
    notification::{NotificationChannel, NotificationSink},
    tracker::TrackerStatus,
    Fix, LocationError, LocationProvider,
};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

pub fn open_store(dir: &Path) -> Database {
    Database::new(dir.join("samples.sqlite3")).expect("open store")
}

pub async fn seed_session(db: &Database, id: &str) -> TrackingSession {
    let session = TrackingSession::begin(id.to_string(), Utc::now());
    db.open_session(&session).await.expect("open session");
    session
}

pub fn sample_at(session_id: &str, monotonic_ms: u64, wall_clock: DateTime<Utc>) -> Sample {
    Sample {
        session_id: session_id.to_string(),
        timestamp: SampleTimestamp {
            monotonic_ms,
            wall_clock,
        },
        latitude: 52.52 + monotonic_ms as f64 * 1e-6,
        longitude: 13.405,
        accuracy_m: 12.5,
        source_id: "gps".into(),
    }
}

pub fn berlin_fix() -> Fix {
    Fix::new(52.5200, 13.4050, 8.0, "gps")
}

#[derive(Debug, Clone)]
pub enum Step {
    Fix(Fix),
    Fail(LocationError),
    Hang,
}

/// Replays scripted answers, then keeps returning the fallback.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new(Vec::new(), Step::Fix(berlin_fix()))
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for ScriptedProvider {
    async fn request_fix(&self, _timeout: Duration) -> Result<Fix, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Fix(fix) => Ok(fix),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Keeps every status and channel registration it receives.
#[derive(Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<TrackerStatus>>,
    channels: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<TrackerStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn stopped_count(&self) -> usize {
        self.statuses()
            .iter()
            .filter(|status| status.session_state == SessionState::Stopped)
            .count()
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn register_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let mut channels = self.channels.lock().unwrap();
        if !channels.iter().any(|id| id == channel.id) {
            channels.push(channel.id.to_string());
        }
        Ok(())
    }

    async fn publish(&self, status: &TrackerStatus) -> Result<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// Database wrapper that fails or slows down chosen calls.
pub struct FlakyStore {
    pub db: Database,
    injected: Mutex<VecDeque<StoreError>>,
    close_failures: AtomicUsize,
    close_delay: Mutex<Option<Duration>>,
    /// Gets a permit each time `close_session` starts.
    pub close_entered: Notify,
}

impl FlakyStore {
    pub fn new(db: Database) -> Arc<Self> {
        Arc::new(Self {
            db,
            injected: Mutex::new(VecDeque::new()),
            close_failures: AtomicUsize::new(0),
            close_delay: Mutex::new(None),
            close_entered: Notify::new(),
        })
    }

    pub fn fail_next_appends(&self, count: usize) {
        let mut injected = self.injected.lock().unwrap();
        for _ in 0..count {
            injected.push_back(StoreError::WriteFailed("disk I/O error (injected)".into()));
        }
    }

    pub fn fail_next_append_with(&self, err: StoreError) {
        self.injected.lock().unwrap().push_back(err);
    }

    pub fn fail_next_closes(&self, count: usize) {
        self.close_failures.store(count, Ordering::SeqCst);
    }

    pub fn delay_closes(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl TrackingStore for FlakyStore {
    async fn open_session(&self, session: &TrackingSession) -> Result<(), StoreError> {
        self.db.open_session(session).await
    }

    async fn close_session(
        &self,
        session_id: &str,
        state: SessionState,
        stop_reason: Option<StopReason>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.close_entered.notify_one();
        let delay = *self.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .close_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::WriteFailed("disk I/O error (injected)".into()));
        }
        self.db
            .close_session(session_id, state, stop_reason, ended_at)
            .await
    }

    async fn active_session(&self) -> Result<Option<TrackingSession>, StoreError> {
        self.db.active_session().await
    }

    async fn last_sample(&self, session_id: &str) -> Result<Option<Sample>, StoreError> {
        self.db.last_sample(session_id).await
    }

    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        let injected = self.injected.lock().unwrap().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        self.db.append(sample).await
    }
}
