//! Location sample data model.
//!
//! A sample is one committed location fix. Once appended it belongs to the store and
//! is never rewritten; the only way it leaves is retention pruning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic + wall-clock pair.
///
/// `monotonic_ms` counts milliseconds since the owning session started and never goes
/// backwards within that session, even if the device clock is adjusted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampleTimestamp {
    pub monotonic_ms: u64,
    pub wall_clock: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub session_id: String,
    pub timestamp: SampleTimestamp,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy_m: f64,
    pub source_id: String,
}

impl Sample {
    /// Rough on-disk footprint used for the catalog size counters.
    pub fn approx_bytes(&self) -> u64 {
        // seq, two timestamps, three reals
        const FIXED: u64 = 6 * 8;
        FIXED + self.session_id.len() as u64 + self.source_id.len() as u64
    }
}

/// Catalog counters maintained alongside the sample log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub sample_count: u64,
    pub approx_bytes: u64,
    pub pruned_total: u64,
    /// `page_count * page_size` of the main database file.
    pub page_bytes: u64,
}
