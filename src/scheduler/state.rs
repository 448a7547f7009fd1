use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerState {
    Idle,
    Armed,
    Firing,
    Stopped,
}

impl Default for SchedulerState {
    fn default() -> Self {
        SchedulerState::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// Fired within one interval of its deadline.
    Scheduled,
    /// Single tick standing in for every deadline that elapsed while the process
    /// was not running.
    CatchUp { coalesced: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub seq: u64,
    pub kind: TickKind,
    pub scheduled_for: Instant,
    pub fired_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub ticks_fired: u64,
    pub catch_up_ticks: u64,
    /// Deadlines that were folded into catch-up ticks instead of firing.
    pub deadlines_skipped: u64,
}

/// Decides what kind of tick is due at `now` for a tick planned at `deadline`, and
/// when the following one is due.
///
/// A late tick that is still inside its interval keeps the original cadence. Once a
/// whole interval or more was missed, the tick becomes a catch-up and the cadence is
/// re-anchored at `now`.
pub fn plan_tick(deadline: Instant, now: Instant, interval: Duration) -> (TickKind, Instant) {
    let lateness = now.saturating_duration_since(deadline);
    let extra = lateness.as_nanos() / interval.as_nanos().max(1);
    let elapsed_deadlines = u64::try_from(extra).unwrap_or(u64::MAX).saturating_add(1);

    if elapsed_deadlines > 1 {
        (
            TickKind::CatchUp {
                coalesced: elapsed_deadlines,
            },
            now + interval,
        )
    } else {
        (TickKind::Scheduled, deadline + interval)
    }
}
