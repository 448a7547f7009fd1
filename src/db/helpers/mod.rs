use chrono::{DateTime, TimeZone, Utc};

use crate::db::{
    error::StoreError,
    models::{SessionState, StopReason},
};

pub fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::WriteFailed(format!("value {value} exceeds SQLite INTEGER range")))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{field} contains negative value {value}")))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("failed to parse {field}: {err}")))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

/// Samples keep wall-clock time as epoch milliseconds so range queries stay numeric.
pub fn from_epoch_ms(value: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("recorded_at_ms {value} is out of range")))
}

pub fn parse_state(value: &str) -> Result<SessionState, StoreError> {
    match value {
        "Armed" => Ok(SessionState::Armed),
        "Stopped" => Ok(SessionState::Stopped),
        "Interrupted" => Ok(SessionState::Interrupted),
        other => Err(StoreError::Corrupt(format!("unknown session state {other}"))),
    }
}

pub fn parse_stop_reason(value: Option<String>) -> Result<Option<StopReason>, StoreError> {
    match value.as_deref() {
        None => Ok(None),
        Some("Requested") => Ok(Some(StopReason::Requested)),
        Some("PermissionDenied") => Ok(Some(StopReason::PermissionDenied)),
        Some("StoreCorrupt") => Ok(Some(StopReason::StoreCorrupt)),
        Some(other) => Err(StoreError::Corrupt(format!("unknown stop reason {other}"))),
    }
}
