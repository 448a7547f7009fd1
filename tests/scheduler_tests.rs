//! Scheduler timing tests on a paused tokio clock.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use blo_tracker_lib::scheduler::{
    Scheduler, SchedulerError, SchedulerState, Tick, TickHandler, TickKind,
};
use tokio::{
    sync::{mpsc, Notify},
    time::{self, Instant},
};

const MINUTE: Duration = Duration::from_secs(60);
const SLACK: Duration = Duration::from_millis(5);

struct ChannelHandler {
    tx: mpsc::UnboundedSender<Tick>,
}

#[async_trait]
impl TickHandler for ChannelHandler {
    async fn on_tick(&self, tick: Tick) {
        let _ = self.tx.send(tick);
    }
}

fn channel_handler() -> (Arc<ChannelHandler>, mpsc::UnboundedReceiver<Tick>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelHandler { tx }), rx)
}

/// Reports entry, then waits for the gate before returning.
struct GatedHandler {
    entered: mpsc::UnboundedSender<u64>,
    gate: Arc<Notify>,
}

#[async_trait]
impl TickHandler for GatedHandler {
    async fn on_tick(&self, tick: Tick) {
        let _ = self.entered.send(tick.seq);
        self.gate.notified().await;
    }
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_immediate_then_follows_interval() {
    let (handler, mut rx) = channel_handler();
    let mut scheduler = Scheduler::new();
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let started = Instant::now();
    scheduler.start(MINUTE, handler).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(first.kind, TickKind::Scheduled);
    assert!(first.fired_at.duration_since(started) < SLACK);

    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind, TickKind::Scheduled);
    let gap = second.fired_at.duration_since(first.fired_at);
    assert!(gap >= MINUTE && gap < MINUTE + SLACK, "gap was {gap:?}");

    assert_eq!(scheduler.stop().await, SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn suspension_yields_exactly_one_catch_up_tick() {
    let (handler, mut rx) = channel_handler();
    let mut scheduler = Scheduler::new();
    scheduler.start(MINUTE, handler).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, TickKind::Scheduled);

    // Five deadlines pass while the process is not running.
    time::advance(5 * MINUTE + Duration::from_secs(1)).await;

    let catch_up = rx.recv().await.unwrap();
    assert_eq!(catch_up.kind, TickKind::CatchUp { coalesced: 5 });

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(rx.try_recv().is_err(), "missed deadlines must not be replayed");

    let next = rx.recv().await.unwrap();
    assert_eq!(next.kind, TickKind::Scheduled);
    let gap = next.fired_at.duration_since(catch_up.fired_at);
    assert!(gap >= MINUTE && gap < MINUTE + SLACK, "gap was {gap:?}");

    let stats = scheduler.stats();
    assert_eq!(stats.ticks_fired, 3);
    assert_eq!(stats.catch_up_ticks, 1);
    assert_eq!(stats.deadlines_skipped, 4);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn state_moves_through_firing_and_back_to_armed() {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Notify::new());
    let handler = Arc::new(GatedHandler {
        entered: entered_tx,
        gate: gate.clone(),
    });

    let mut scheduler = Scheduler::new();
    let mut states = scheduler.subscribe();
    scheduler.start(MINUTE, handler).unwrap();

    assert_eq!(entered_rx.recv().await, Some(1));
    assert_eq!(scheduler.state(), SchedulerState::Firing);

    gate.notify_one();
    states
        .wait_for(|state| *state == SchedulerState::Armed)
        .await
        .unwrap();

    assert_eq!(scheduler.stop().await, SchedulerState::Stopped);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_tick_in_flight() {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(GatedHandler {
        entered: entered_tx,
        gate: Arc::new(Notify::new()),
    });

    let mut scheduler = Scheduler::new();
    scheduler.start(MINUTE, handler).unwrap();
    assert_eq!(entered_rx.recv().await, Some(1));

    assert_eq!(scheduler.stop().await, SchedulerState::Stopped);
    assert_eq!(scheduler.stats().ticks_fired, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_terminal() {
    let (handler, _rx) = channel_handler();
    let mut scheduler = Scheduler::new();

    assert_eq!(scheduler.stop().await, SchedulerState::Stopped);
    assert_eq!(scheduler.stop().await, SchedulerState::Stopped);

    assert_eq!(
        scheduler.start(MINUTE, handler),
        Err(SchedulerError::Terminated)
    );
}

#[tokio::test(start_paused = true)]
async fn start_rejects_double_arming_and_zero_interval() {
    let (handler, mut rx) = channel_handler();

    let mut idle = Scheduler::new();
    assert_eq!(
        idle.start(Duration::ZERO, handler.clone()),
        Err(SchedulerError::InvalidInterval)
    );
    assert_eq!(idle.state(), SchedulerState::Idle);

    let mut scheduler = Scheduler::new();
    scheduler.start(MINUTE, handler.clone()).unwrap();
    assert_eq!(
        scheduler.start(MINUTE, handler),
        Err(SchedulerError::AlreadyRunning)
    );

    rx.recv().await.unwrap();
    scheduler.stop().await;
}
