//! Periodic retention pruning.

use std::time::Duration;

use chrono::Utc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::Database;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Spawns a task that drops samples older than `max_age` every `every`.
///
/// A corrupt store ends the task; other failures are logged and retried next round.
pub fn spawn_retention(
    db: Database,
    max_age: chrono::Duration,
    every: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - max_age;
                    match db.prune(cutoff).await {
                        Ok(0) => {}
                        Ok(pruned) => log_info!("retention pruned {} samples older than {}", pruned, cutoff),
                        Err(err) if err.is_corrupt() => {
                            log_error!("retention stopped, store is corrupt: {err}");
                            break;
                        }
                        Err(err) => log_error!("retention pass failed: {err}"),
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!("retention task shutting down");
                    break;
                }
            }
        }
    })
}
