use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    connection::Database,
    error::StoreError,
    models::{Sample, SessionState, StopReason, TrackingSession},
};

/// Persistence the tracker depends on.
///
/// [`Database`] is the production implementation; the trait exists so the tracker can
/// run against a wrapped or scripted store.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn open_session(&self, session: &TrackingSession) -> Result<(), StoreError>;

    async fn close_session(
        &self,
        session_id: &str,
        state: SessionState,
        stop_reason: Option<StopReason>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn active_session(&self) -> Result<Option<TrackingSession>, StoreError>;

    async fn last_sample(&self, session_id: &str) -> Result<Option<Sample>, StoreError>;

    async fn append(&self, sample: &Sample) -> Result<(), StoreError>;
}

#[async_trait]
impl TrackingStore for Database {
    async fn open_session(&self, session: &TrackingSession) -> Result<(), StoreError> {
        Database::open_session(self, session).await
    }

    async fn close_session(
        &self,
        session_id: &str,
        state: SessionState,
        stop_reason: Option<StopReason>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Database::close_session(self, session_id, state, stop_reason, ended_at).await
    }

    async fn active_session(&self) -> Result<Option<TrackingSession>, StoreError> {
        Database::active_session(self).await
    }

    async fn last_sample(&self, session_id: &str) -> Result<Option<Sample>, StoreError> {
        Database::last_sample(self, session_id).await
    }

    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        Database::append(self, sample).await
    }
}
