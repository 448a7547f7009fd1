use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    error::{read_error, write_error, StoreError},
    helpers::{parse_datetime, parse_optional_datetime, parse_state, parse_stop_reason},
    models::{SessionState, StopReason, TrackingSession},
};

const SESSION_COLUMNS: &str = "id, started_at, ended_at, state, stop_reason";

fn row_to_session(row: &Row) -> Result<TrackingSession, StoreError> {
    let id: String = row.get("id").map_err(read_error)?;
    let started_at: String = row.get("started_at").map_err(read_error)?;
    let ended_at: Option<String> = row.get("ended_at").map_err(read_error)?;
    let state: String = row.get("state").map_err(read_error)?;
    let stop_reason: Option<String> = row.get("stop_reason").map_err(read_error)?;

    Ok(TrackingSession {
        id,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        state: parse_state(&state)?,
        stop_reason: parse_stop_reason(stop_reason)?,
    })
}

impl Database {
    /// Persists a new `Armed` session and takes the tracking lock.
    ///
    /// Fails with `SessionConflict` while any other session is still armed.
    pub async fn open_session(&self, session: &TrackingSession) -> Result<(), StoreError> {
        let record = session.clone();
        self.execute(move |conn| {
            let tx = conn.transaction().map_err(write_error)?;

            let active: Option<String> = tx
                .query_row(
                    "SELECT id FROM sessions WHERE state = 'Armed' LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(read_error)?;
            if let Some(active) = active {
                return Err(StoreError::SessionConflict { active });
            }

            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO sessions (id, started_at, ended_at, state, stop_reason, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, NULL, ?4, ?4)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    SessionState::Armed.as_str(),
                    now,
                ],
            )
            .map_err(write_error)?;

            tx.commit().map_err(write_error)?;
            Ok(())
        })
        .await
    }

    /// Moves a session into a terminal state and releases the tracking lock.
    pub async fn close_session(
        &self,
        session_id: &str,
        state: SessionState,
        stop_reason: Option<StopReason>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !matches!(state, SessionState::Stopped | SessionState::Interrupted) {
            return Err(StoreError::WriteFailed(format!(
                "{} is not a terminal session state",
                state.as_str()
            )));
        }

        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE sessions
                     SET state = ?1,
                         stop_reason = ?2,
                         ended_at = ?3,
                         updated_at = ?4
                     WHERE id = ?5",
                    params![
                        state.as_str(),
                        stop_reason.map(|reason| reason.as_str()),
                        ended_at.to_rfc3339(),
                        Utc::now().to_rfc3339(),
                        session_id,
                    ],
                )
                .map_err(write_error)?;

            if rows_affected == 0 {
                return Err(StoreError::WriteFailed(format!(
                    "session {session_id} not found"
                )));
            }
            Ok(())
        })
        .await
    }

    /// The session currently holding the tracking lock, if any.
    pub async fn active_session(&self) -> Result<Option<TrackingSession>, StoreError> {
        self.execute(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE state = 'Armed'
                     ORDER BY started_at DESC
                     LIMIT 1"
                ))
                .map_err(read_error)?;

            let mut rows = stmt.query([]).map_err(read_error)?;
            match rows.next().map_err(read_error)? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<TrackingSession>, StoreError> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))
                .map_err(read_error)?;

            let mut rows = stmt.query(params![session_id]).map_err(read_error)?;
            match rows.next().map_err(read_error)? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Every session record, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<TrackingSession>, StoreError> {
        self.execute(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC"
                ))
                .map_err(read_error)?;

            let mut rows = stmt.query([]).map_err(read_error)?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next().map_err(read_error)? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}
