pub mod db;
pub mod location;
pub mod notification;
pub mod scheduler;
pub mod settings;
pub mod tracker;
mod utils;

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use db::{Database, Sample, SampleCursor, StoreError, TrackingSession};
pub use location::{Fix, LocationError, LocationProvider};
pub use notification::{LogNotificationSink, NotificationChannel, NotificationSink, TRACKING_CHANNEL};
pub use scheduler::{Scheduler, SchedulerError, SchedulerState};
pub use settings::{SettingsStore, TrackerSettings};
pub use tracker::{RecoveryOutcome, TickOutcome, Tracker, TrackerConfig, TrackerError, TrackerStatus};
pub use utils::logging::init_logging;

pub const DATABASE_FILE: &str = "blo_tracker.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// Everything the tracking service needs, wired once at process bring-up.
pub struct TrackerApp {
    pub db: Database,
    pub tracker: Tracker,
    pub settings: SettingsStore,
    pub recovery: RecoveryOutcome,
    retention: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TrackerApp {
    /// Host entry point, called once when the process comes up.
    ///
    /// Opens the store and settings under `data_dir`, registers the tracking
    /// notification channel, deals with a session a crashed process left armed, and
    /// starts retention pruning.
    pub async fn bootstrap(
        data_dir: &Path,
        provider: Arc<dyn LocationProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        init_logging();
        info!("BLO tracker starting up...");

        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let tracker_settings = settings.tracker();

        let db = Database::new(data_dir.join(DATABASE_FILE)).context("failed to open sample store")?;

        sink.register_channel(&TRACKING_CHANNEL)
            .await
            .context("failed to register tracking notification channel")?;

        let tracker = Tracker::new(
            Arc::new(db.clone()),
            provider,
            sink,
            tracker_settings.tracker_config(),
        );

        let recovery = tracker
            .recover()
            .await
            .context("failed to recover previous tracking session")?;
        match &recovery {
            RecoveryOutcome::Resumed(session) => {
                tracker
                    .arm_scheduler()
                    .await
                    .with_context(|| format!("failed to re-arm session {}", session.id))?;
                info!("Session {} resumed after restart", session.id);
            }
            RecoveryOutcome::Interrupted(session) => {
                warn!("Session {} was interrupted by the previous shutdown", session.id);
            }
            RecoveryOutcome::NoSession => {}
        }

        let retention = tracker_settings.retention().map(|(max_age, every)| {
            let token = CancellationToken::new();
            let handle = db::maintenance::spawn_retention(db.clone(), max_age, every, token.clone());
            (token, handle)
        });

        Ok(Self {
            db,
            tracker,
            settings,
            recovery,
            retention,
        })
    }

    /// Process is going away: stop background work but leave an active session armed
    /// so the next bootstrap can recover it.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(session) = self.tracker.detach().await {
            info!("Leaving session {} armed for the next start", session.id);
        }

        if let Some((token, handle)) = self.retention.take() {
            token.cancel();
            handle.await.context("retention task failed to join")?;
        }

        info!("BLO tracker shut down");
        Ok(())
    }
}
