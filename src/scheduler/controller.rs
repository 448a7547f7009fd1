use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use super::state::{plan_tick, SchedulerState, SchedulerStats, Tick, TickKind};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler was stopped and cannot be restarted")]
    Terminated,
    #[error("sampling interval must be greater than zero")]
    InvalidInterval,
}

/// Callback invoked on the scheduler's background task for every tick.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self, tick: Tick);
}

#[derive(Default)]
struct StatsCounters {
    ticks_fired: AtomicU64,
    catch_up_ticks: AtomicU64,
    deadlines_skipped: AtomicU64,
}

impl StatsCounters {
    fn record(&self, kind: TickKind) {
        self.ticks_fired.fetch_add(1, Ordering::Relaxed);
        if let TickKind::CatchUp { coalesced } = kind {
            self.catch_up_ticks.fetch_add(1, Ordering::Relaxed);
            self.deadlines_skipped
                .fetch_add(coalesced.saturating_sub(1), Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            ticks_fired: self.ticks_fired.load(Ordering::Relaxed),
            catch_up_ticks: self.catch_up_ticks.load(Ordering::Relaxed),
            deadlines_skipped: self.deadlines_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Recurring tick source: `Idle -> Armed -> Firing -> Armed ... -> Stopped`.
///
/// The first tick fires as soon as the scheduler is armed. `Stopped` is terminal.
pub struct Scheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    stats: Arc<StatsCounters>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            handle: None,
            cancel_token: CancellationToken::new(),
            state_tx: Arc::new(state_tx),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }

    /// Token that stops the tick loop without waiting for it. Safe to cancel from
    /// inside a tick handler, where [`Scheduler::stop`] would wait on itself.
    pub fn stop_signal(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn start(
        &mut self,
        interval: Duration,
        handler: Arc<dyn TickHandler>,
    ) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::Idle => {}
            SchedulerState::Armed | SchedulerState::Firing => {
                return Err(SchedulerError::AlreadyRunning)
            }
            SchedulerState::Stopped => return Err(SchedulerError::Terminated),
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        self.state_tx.send_replace(SchedulerState::Armed);
        log_info!("scheduler armed (interval={}ms)", interval.as_millis());

        let handle = tokio::spawn(tick_loop(
            interval,
            handler,
            self.cancel_token.clone(),
            self.state_tx.clone(),
            self.stats.clone(),
        ));
        self.handle = Some(handle);
        Ok(())
    }

    /// Stops ticking and waits for the loop to exit. Cancels a tick in flight.
    /// Idempotent.
    pub async fn stop(&mut self) -> SchedulerState {
        self.cancel_token.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                log_error!("scheduler loop failed to join: {err}");
            }
        }

        self.state_tx.send_replace(SchedulerState::Stopped);
        SchedulerState::Stopped
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn tick_loop(
    interval: Duration,
    handler: Arc<dyn TickHandler>,
    cancel_token: CancellationToken,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    stats: Arc<StatsCounters>,
) {
    let mut deadline = Instant::now();
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = time::sleep_until(deadline) => {}
        }

        let fired_at = Instant::now();
        let (kind, next_deadline) = plan_tick(deadline, fired_at, interval);
        seq = seq.wrapping_add(1);
        stats.record(kind);

        match kind {
            TickKind::Scheduled => log_debug!("tick {} firing", seq),
            TickKind::CatchUp { coalesced } => {
                log_warn!("tick {} is a catch-up for {} missed deadlines", seq, coalesced)
            }
        }

        state_tx.send_replace(SchedulerState::Firing);
        let tick = Tick {
            seq,
            kind,
            scheduled_for: deadline,
            fired_at,
        };

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("tick {} cancelled by stop", seq);
                break;
            }
            _ = handler.on_tick(tick) => {}
        }

        if cancel_token.is_cancelled() {
            break;
        }
        state_tx.send_replace(SchedulerState::Armed);
        deadline = next_deadline;
    }

    state_tx.send_replace(SchedulerState::Stopped);
    log_info!("scheduler stopped after {} ticks", seq);
}
