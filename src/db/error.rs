use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the sample store.
///
/// `WriteFailed` is scoped to a single call and may be retried. `Corrupt` poisons the
/// store instance: every later call fails the same way until the store is recreated.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum StoreError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("store is corrupt: {0}")]
    Corrupt(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("sample for session {session_id} is out of order ({got_ms}ms < {last_ms}ms)")]
    OutOfOrder {
        session_id: String,
        last_ms: u64,
        got_ms: u64,
    },
    #[error("session {active} already holds the tracking lock")]
    SessionConflict { active: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt(_))
    }
}

pub(crate) fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase,
                ..
            },
            _
        )
    )
}

/// Maps a SQLite error raised while mutating the store.
pub(crate) fn write_error(err: rusqlite::Error) -> StoreError {
    if is_corruption(&err) {
        StoreError::Corrupt(err.to_string())
    } else {
        StoreError::WriteFailed(err.to_string())
    }
}

/// Maps a SQLite error raised while reading the store.
pub(crate) fn read_error(err: rusqlite::Error) -> StoreError {
    if is_corruption(&err) {
        StoreError::Corrupt(err.to_string())
    } else {
        StoreError::ReadFailed(err.to_string())
    }
}
