use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::tracker::TrackerConfig;

const DEBUG_SAMPLING_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub sampling_interval_seconds: u64,
    pub fix_timeout_seconds: u64,
    pub permission_denied_limit: u32,
    /// `None` keeps samples forever.
    pub retention_days: Option<u32>,
    pub retention_check_seconds: u64,
    pub resume_interrupted_session: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            sampling_interval_seconds: 60,
            fix_timeout_seconds: 30,
            permission_denied_limit: 5,
            retention_days: Some(30),
            retention_check_seconds: 3600,
            resume_interrupted_session: true,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_interval_seconds == 0 {
            bail!("samplingIntervalSeconds must be greater than zero");
        }
        if self.fix_timeout_seconds == 0 {
            bail!("fixTimeoutSeconds must be greater than zero");
        }
        if self.permission_denied_limit == 0 {
            bail!("permissionDeniedLimit must be at least one");
        }
        if self.retention_check_seconds == 0 {
            bail!("retentionCheckSeconds must be greater than zero");
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let debug_mode = std::env::var("BLO_TRACKER_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let interval_secs = if debug_mode {
            DEBUG_SAMPLING_INTERVAL_SECS
        } else {
            self.sampling_interval_seconds
        };

        TrackerConfig {
            sampling_interval: Duration::from_secs(interval_secs),
            fix_timeout: Duration::from_secs(self.fix_timeout_seconds),
            permission_denied_limit: self.permission_denied_limit,
            resume_interrupted_session: self.resume_interrupted_session,
        }
    }

    pub fn retention(&self) -> Option<(chrono::Duration, Duration)> {
        self.retention_days.map(|days| {
            (
                chrono::Duration::days(i64::from(days)),
                Duration::from_secs(self.retention_check_seconds),
            )
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    tracker: TrackerSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(data) if data.tracker.validate().is_ok() => data,
                Ok(_) | Err(_) => {
                    log::warn!(
                        "Ignoring invalid settings in {}, using defaults",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerSettings {
        self.read().tracker.clone()
    }

    pub fn update_tracker(&self, settings: TrackerSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        let mut next = guard.clone();
        next.tracker = settings;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: UserSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", self.path.display()))?;
        data.tracker.validate()?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
