use std::{
    sync::{Arc, Mutex as StdMutex, Weak},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;
use tokio::{sync::Mutex, time};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db::{
        Sample, SampleTimestamp, SessionState, StopReason, StoreError, TrackingSession,
        TrackingStore,
    },
    location::{Fix, LocationError, LocationProvider},
    notification::NotificationSink,
    scheduler::{Scheduler, SchedulerError, SchedulerState, SchedulerStats, Tick, TickHandler},
};

use super::state::{TrackerState, TrackerStatus};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub sampling_interval: Duration,
    pub fix_timeout: Duration,
    /// Consecutive `PermissionDenied` ticks tolerated before the session stops.
    pub permission_denied_limit: u32,
    pub resume_interrupted_session: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(60),
            fix_timeout: Duration::from_secs(30),
            permission_denied_limit: 5,
            resume_interrupted_session: true,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.sampling_interval.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "sampling interval must be greater than zero".into(),
            ));
        }
        if self.fix_timeout.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "fix timeout must be greater than zero".into(),
            ));
        }
        if self.permission_denied_limit == 0 {
            return Err(TrackerError::InvalidConfig(
                "permission denied limit must be at least one".into(),
            ));
        }
        Ok(())
    }

    /// A fix request never outlives one sampling interval.
    pub fn effective_fix_timeout(&self) -> Duration {
        self.fix_timeout.min(self.sampling_interval)
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("a tracking session is already active")]
    AlreadyTracking,
    #[error("no active tracking session")]
    NoActiveSession,
    #[error("session {0} already holds the tracking lock")]
    SessionLocked(String),
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Recorded(Sample),
    Degraded(LocationError),
    SessionStopped(StopReason),
    /// No active session; nothing was requested.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    NoSession,
    Resumed(TrackingSession),
    Interrupted(TrackingSession),
}

struct TrackerInner {
    store: Arc<dyn TrackingStore>,
    provider: Arc<dyn LocationProvider>,
    sink: Arc<dyn NotificationSink>,
    config: TrackerConfig,
    state: Mutex<TrackerState>,
    scheduler: Mutex<Option<Scheduler>>,
    stop_signal: StdMutex<Option<CancellationToken>>,
    /// Serializes closing a stopped session so it is persisted and announced once.
    settle_lock: Mutex<()>,
}

/// Orchestrates sampling for one tracking session at a time.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        provider: Arc<dyn LocationProvider>,
        sink: Arc<dyn NotificationSink>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                store,
                provider,
                sink,
                config,
                state: Mutex::new(TrackerState::new()),
                scheduler: Mutex::new(None),
                stop_signal: StdMutex::new(None),
                settle_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub async fn current_status(&self) -> TrackerStatus {
        self.inner.state.lock().await.status()
    }

    pub async fn current_session(&self) -> Option<TrackingSession> {
        self.inner.state.lock().await.session.clone()
    }

    pub async fn scheduler_state(&self) -> Option<SchedulerState> {
        self.inner
            .scheduler
            .lock()
            .await
            .as_ref()
            .map(Scheduler::state)
    }

    pub async fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.inner
            .scheduler
            .lock()
            .await
            .as_ref()
            .map(Scheduler::stats)
    }

    /// Opens a session and arms the internal scheduler.
    pub async fn start(&self) -> Result<TrackingSession, TrackerError> {
        let session = self.start_session().await?;

        if let Err(err) = self.arm_scheduler().await {
            error!("Failed to arm scheduler for session {}: {err}", session.id);
            if let Err(stop_err) = self.stop().await {
                error!("Failed to roll back session {}: {stop_err}", session.id);
            }
            return Err(err);
        }

        Ok(session)
    }

    /// Opens a session without arming the internal scheduler. The host delivers ticks
    /// through [`Tracker::on_tick`], e.g. from a platform alarm.
    pub async fn start_session(&self) -> Result<TrackingSession, TrackerError> {
        self.inner.config.validate()?;
        self.settle_stop().await?;

        let (session, status) = {
            let mut state = self.inner.state.lock().await;
            if state.is_active() {
                return Err(TrackerError::AlreadyTracking);
            }

            let session = TrackingSession::begin(Uuid::new_v4().to_string(), Utc::now());
            self.inner
                .store
                .open_session(&session)
                .await
                .map_err(|err| match err {
                    StoreError::SessionConflict { active } => TrackerError::SessionLocked(active),
                    other => TrackerError::Store(other),
                })?;

            state.begin_session(session.clone(), Instant::now());
            (session, state.status())
        };

        info!("Tracking session {} started", session.id);
        self.publish(&status).await;
        Ok(session)
    }

    /// Arms a fresh scheduler for the active session.
    pub async fn arm_scheduler(&self) -> Result<(), TrackerError> {
        if !self.inner.state.lock().await.is_active() {
            return Err(TrackerError::NoActiveSession);
        }

        let mut guard = self.inner.scheduler.lock().await;
        if let Some(previous) = guard.as_ref() {
            let winding_down = previous.stop_signal().is_cancelled();
            if !winding_down
                && matches!(previous.state(), SchedulerState::Armed | SchedulerState::Firing)
            {
                return Err(SchedulerError::AlreadyRunning.into());
            }
        }
        if let Some(mut previous) = guard.take() {
            previous.stop().await;
        }

        let mut scheduler = Scheduler::new();
        let handler = Arc::new(TrackerTickHandler {
            tracker: Arc::downgrade(&self.inner),
        });
        scheduler.start(self.inner.config.sampling_interval, handler)?;

        *self.stop_signal_slot() = Some(scheduler.stop_signal());
        *guard = Some(scheduler);
        Ok(())
    }

    /// Stops tracking. Idempotent: once stopped, further calls only report status.
    pub async fn stop(&self) -> Result<TrackerStatus, TrackerError> {
        let scheduler = self.inner.scheduler.lock().await.take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop().await;
        }
        self.stop_signal_slot().take();

        let stopped = self
            .inner
            .state
            .lock()
            .await
            .stop(StopReason::Requested, Utc::now());
        if let Some(session) = stopped {
            info!("Tracking session {} stopped", session.id);
        }

        // Also finishes a stop an earlier call or tick left unpersisted.
        self.settle_stop().await?;
        Ok(self.current_status().await)
    }

    /// Stops ticking but leaves the session armed in the store, for a process that is
    /// going away and expects the next bring-up to [`Tracker::recover`] it.
    pub async fn detach(&self) -> Option<TrackingSession> {
        let scheduler = self.inner.scheduler.lock().await.take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop().await;
        }
        self.stop_signal_slot().take();

        if let Err(err) = self.settle_stop().await {
            error!("Detaching with an unpersisted stop: {err}");
        }

        let mut state = self.inner.state.lock().await;
        let session = state.session.take().filter(|session| session.state.is_active());
        *state = TrackerState::new();
        if let Some(session) = &session {
            info!("Detached from session {}; it stays armed in the store", session.id);
        }
        session
    }

    /// Deals with a session a previous process left armed.
    pub async fn recover(&self) -> Result<RecoveryOutcome, TrackerError> {
        if self.inner.state.lock().await.is_active() {
            return Err(TrackerError::AlreadyTracking);
        }
        self.settle_stop().await?;

        let Some(mut session) = self.inner.store.active_session().await? else {
            return Ok(RecoveryOutcome::NoSession);
        };

        if !self.inner.config.resume_interrupted_session {
            let ended_at = Utc::now();
            warn!(
                "Recovered incomplete session {}; marking as Interrupted",
                session.id
            );
            self.inner
                .store
                .close_session(&session.id, SessionState::Interrupted, None, ended_at)
                .await?;
            session.state = SessionState::Interrupted;
            session.ended_at = Some(ended_at);
            return Ok(RecoveryOutcome::Interrupted(session));
        }

        let last_sample = self.inner.store.last_sample(&session.id).await?;
        let baseline_ms = last_sample
            .as_ref()
            .map(|sample| sample.timestamp.monotonic_ms)
            .unwrap_or(0);

        let status = {
            let mut state = self.inner.state.lock().await;
            state.resume_session(
                session.clone(),
                last_sample.map(|sample| sample.timestamp.wall_clock),
                baseline_ms,
                Instant::now(),
            );
            state.status()
        };

        warn!(
            "Resuming session {} left armed by a previous process (baseline {}ms)",
            session.id, baseline_ms
        );
        self.publish(&status).await;
        Ok(RecoveryOutcome::Resumed(session))
    }

    /// Takes one sample for the active session.
    ///
    /// Location failures are reported as [`TickOutcome::Degraded`] and retried on the
    /// next tick. A failed store write is an error for this tick only; the session
    /// stays armed.
    pub async fn on_tick(&self) -> Result<TickOutcome, TrackerError> {
        let session_id = {
            let mut state = self.inner.state.lock().await;
            if !state.is_active() {
                return Ok(TickOutcome::Skipped);
            }
            state.set_phase(SessionState::Firing);
            match state.session_id() {
                Some(id) => id.to_string(),
                None => return Ok(TickOutcome::Skipped),
            }
        };

        let timeout = self.inner.config.effective_fix_timeout();
        let fix = match time::timeout(timeout, self.inner.provider.request_fix(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout),
        }
        .and_then(|fix| {
            if fix.is_plausible() {
                Ok(fix)
            } else {
                log_warn!(
                    "discarding implausible fix from {}: ({}, {}) ±{}m",
                    fix.source_id,
                    fix.latitude,
                    fix.longitude,
                    fix.accuracy_m
                );
                Err(LocationError::Unavailable)
            }
        });

        match fix {
            Ok(fix) => self.record_fix(&session_id, fix).await,
            Err(err) => self.record_location_failure(&session_id, err).await,
        }
    }

    async fn record_fix(&self, session_id: &str, fix: Fix) -> Result<TickOutcome, TrackerError> {
        let sample = {
            let mut state = self.inner.state.lock().await;
            if !state.is_active() || state.session_id() != Some(session_id) {
                return Ok(TickOutcome::Skipped);
            }
            Sample {
                session_id: session_id.to_string(),
                timestamp: SampleTimestamp {
                    monotonic_ms: state.next_monotonic_ms(),
                    wall_clock: Utc::now(),
                },
                latitude: fix.latitude,
                longitude: fix.longitude,
                accuracy_m: fix.accuracy_m,
                source_id: fix.source_id,
            }
        };

        match self.inner.store.append(&sample).await {
            Ok(()) => {
                let status = {
                    let mut state = self.inner.state.lock().await;
                    state.record_sample(sample.timestamp.wall_clock);
                    state.set_phase(SessionState::Armed);
                    state.status()
                };
                log_debug!(
                    "session {} sample at {}ms ({}, {})",
                    session_id,
                    sample.timestamp.monotonic_ms,
                    sample.latitude,
                    sample.longitude
                );
                self.publish(&status).await;
                Ok(TickOutcome::Recorded(sample))
            }
            Err(err) if err.is_corrupt() => {
                error!("Sample store corrupt, stopping session {session_id}: {err}");
                {
                    let mut state = self.inner.state.lock().await;
                    state.record_store_error(&err);
                }
                self.halt(session_id, StopReason::StoreCorrupt).await;
                Err(err.into())
            }
            Err(err) => {
                error!("Dropping sample for session {session_id}: {err}");
                let status = {
                    let mut state = self.inner.state.lock().await;
                    state.record_store_error(&err);
                    state.set_phase(SessionState::Armed);
                    state.status()
                };
                self.publish(&status).await;
                Err(err.into())
            }
        }
    }

    async fn record_location_failure(
        &self,
        session_id: &str,
        err: LocationError,
    ) -> Result<TickOutcome, TrackerError> {
        let (denials, status) = {
            let mut state = self.inner.state.lock().await;
            if !state.is_active() || state.session_id() != Some(session_id) {
                return Ok(TickOutcome::Skipped);
            }
            let denials = state.record_location_error(err);
            state.set_phase(SessionState::Armed);
            (denials, state.status())
        };

        if !err.is_transient() && denials >= self.inner.config.permission_denied_limit
        {
            warn!(
                "Location permission denied for {denials} consecutive ticks; stopping session {session_id}"
            );
            self.halt(session_id, StopReason::PermissionDenied).await;
            return Ok(TickOutcome::SessionStopped(StopReason::PermissionDenied));
        }

        log_warn!("session {} degraded: {err}", session_id);
        self.publish(&status).await;
        Ok(TickOutcome::Degraded(err))
    }

    /// Stops the session from inside a tick, then signals the scheduler.
    async fn halt(&self, session_id: &str, reason: StopReason) {
        {
            let mut state = self.inner.state.lock().await;
            if state.session_id() != Some(session_id) || state.stop(reason, Utc::now()).is_none() {
                return;
            }
        }

        if let Err(err) = self.settle_stop().await {
            error!("Failed to persist stop of session {session_id}: {err}");
        }

        if let Some(token) = self.stop_signal_slot().take() {
            token.cancel();
        }
    }

    /// Persists and announces a pending stop on its own task, so a caller that is
    /// cancelled midway (a tick torn down by `stop`) cannot leave it half done.
    async fn settle_stop(&self) -> Result<(), TrackerError> {
        let tracker = self.clone();
        tokio::spawn(async move { tracker.settle_pending().await })
            .await
            .map_err(|err| {
                TrackerError::Store(StoreError::Unavailable(format!(
                    "session close task failed: {err}"
                )))
            })?
    }

    async fn settle_pending(&self) -> Result<(), TrackerError> {
        let _settling = self.inner.settle_lock.lock().await;

        let Some(pending) = self.inner.state.lock().await.pending_close.clone() else {
            return Ok(());
        };
        let session = &pending.session;

        let mut result = Ok(());
        if !pending.persisted {
            let closed = self
                .inner
                .store
                .close_session(
                    &session.id,
                    SessionState::Stopped,
                    session.stop_reason,
                    session.ended_at.unwrap_or_else(Utc::now),
                )
                .await;
            match closed {
                Ok(()) => self.inner.state.lock().await.mark_persisted(&session.id),
                Err(err) => {
                    error!("Failed to close session {}: {err}", session.id);
                    result = Err(err.into());
                }
            }
        }

        if !pending.published {
            let status = self.inner.state.lock().await.status();
            self.publish(&status).await;
            self.inner.state.lock().await.mark_published(&session.id);
        }

        result
    }

    async fn publish(&self, status: &TrackerStatus) {
        if let Err(err) = self.inner.sink.publish(status).await {
            warn!("Failed to publish tracker status: {err:#}");
        }
    }

    fn stop_signal_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        match self.inner.stop_signal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct TrackerTickHandler {
    tracker: Weak<TrackerInner>,
}

#[async_trait]
impl TickHandler for TrackerTickHandler {
    async fn on_tick(&self, tick: Tick) {
        let Some(inner) = self.tracker.upgrade() else {
            return;
        };
        let tracker = Tracker { inner };

        match tracker.on_tick().await {
            Ok(TickOutcome::Recorded(_)) | Ok(TickOutcome::Skipped) => {}
            Ok(TickOutcome::Degraded(err)) => {
                log_debug!("tick {} ({:?}) degraded: {err}", tick.seq, tick.kind)
            }
            Ok(TickOutcome::SessionStopped(reason)) => {
                info!("tick {} stopped the session ({:?})", tick.seq, reason)
            }
            Err(err) => error!("tick {} ({:?}) failed: {err}", tick.seq, tick.kind),
        }
    }
}
