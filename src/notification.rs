//! Notification sink seam and the channel the tracking service posts to.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tracker::TrackerStatus;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChannelImportance {
    Low,
    Default,
    High,
}

/// User-visible channel descriptor registered once at bring-up.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub importance: ChannelImportance,
}

pub const TRACKING_CHANNEL: NotificationChannel = NotificationChannel {
    id: "blo_tracking_channel",
    name: "BLO Location Tracking",
    description: "Used for location tracking service",
    importance: ChannelImportance::Default,
};

/// Receives tracker status updates for display.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Registers the channel statuses are posted to. Must be idempotent.
    async fn register_channel(&self, channel: &NotificationChannel) -> Result<()>;

    async fn publish(&self, status: &TrackerStatus) -> Result<()>;
}

/// Sink that writes every status to the log. Used when the host supplies none.
#[derive(Debug, Default)]
pub struct LogNotificationSink {
    registered: AtomicBool,
}

impl LogNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }
}

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn register_channel(&self, channel: &NotificationChannel) -> Result<()> {
        if !self.registered.swap(true, Ordering::AcqRel) {
            log_info!("notification channel '{}' ({}) registered", channel.id, channel.name);
        }
        Ok(())
    }

    async fn publish(&self, status: &TrackerStatus) -> Result<()> {
        if !self.is_registered() {
            log_warn!("publishing status before the notification channel was registered");
        }
        log_info!(
            "[{}] session={} state={:?} last_sample_at={:?} last_error={:?}",
            TRACKING_CHANNEL.id,
            status.session_id.as_deref().unwrap_or("-"),
            status.session_state,
            status.last_sample_at,
            status.last_error
        );
        Ok(())
    }
}
