use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    cursor::SampleCursor,
    error::{read_error, write_error, StoreError},
    helpers::{from_epoch_ms, to_i64, to_u64},
    models::{Sample, SampleTimestamp, StoreStats},
};

const SAMPLE_COLUMNS: &str =
    "seq, session_id, recorded_at_ms, monotonic_ms, latitude, longitude, accuracy_m, source_id";

fn row_to_sample(row: &Row) -> Result<(i64, Sample), StoreError> {
    let seq: i64 = row.get("seq").map_err(read_error)?;
    let recorded_at_ms: i64 = row.get("recorded_at_ms").map_err(read_error)?;
    let monotonic_ms: i64 = row.get("monotonic_ms").map_err(read_error)?;

    let sample = Sample {
        session_id: row.get("session_id").map_err(read_error)?,
        timestamp: SampleTimestamp {
            monotonic_ms: to_u64(monotonic_ms, "monotonic_ms")?,
            wall_clock: from_epoch_ms(recorded_at_ms)?,
        },
        latitude: row.get("latitude").map_err(read_error)?,
        longitude: row.get("longitude").map_err(read_error)?,
        accuracy_m: row.get("accuracy_m").map_err(read_error)?,
        source_id: row.get("source_id").map_err(read_error)?,
    };
    Ok((seq, sample))
}

/// Row filter shared by every cursor page.
#[derive(Debug, Clone)]
pub(crate) struct SampleFilter {
    pub session_id: Option<String>,
    pub since_ms: i64,
}

impl Database {
    /// Appends one sample. Returns only after the transaction is committed.
    pub async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        let record = sample.clone();
        self.execute(move |conn| {
            let monotonic_ms = to_i64(record.timestamp.monotonic_ms)?;
            let approx_bytes = to_i64(record.approx_bytes())?;

            let tx = conn.transaction().map_err(write_error)?;

            let last_ms: Option<i64> = tx
                .query_row(
                    "SELECT monotonic_ms FROM samples
                     WHERE session_id = ?1
                     ORDER BY seq DESC
                     LIMIT 1",
                    params![record.session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(read_error)?;

            if let Some(last_ms) = last_ms {
                let last_ms = to_u64(last_ms, "monotonic_ms")?;
                if record.timestamp.monotonic_ms < last_ms {
                    return Err(StoreError::OutOfOrder {
                        session_id: record.session_id.clone(),
                        last_ms,
                        got_ms: record.timestamp.monotonic_ms,
                    });
                }
            }

            tx.execute(
                "INSERT INTO samples (
                    session_id,
                    recorded_at_ms,
                    monotonic_ms,
                    latitude,
                    longitude,
                    accuracy_m,
                    source_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.session_id,
                    record.timestamp.wall_clock.timestamp_millis(),
                    monotonic_ms,
                    record.latitude,
                    record.longitude,
                    record.accuracy_m,
                    record.source_id,
                ],
            )
            .map_err(write_error)?;

            tx.execute(
                "UPDATE store_stats
                 SET sample_count = sample_count + 1,
                     approx_bytes = approx_bytes + ?1
                 WHERE id = 1",
                params![approx_bytes],
            )
            .map_err(write_error)?;

            tx.commit().map_err(write_error)?;
            Ok(())
        })
        .await
    }

    /// Lazily reads every sample recorded at or after `since`, in append order.
    pub fn read_since(&self, since: DateTime<Utc>) -> SampleCursor {
        SampleCursor::new(
            self.clone(),
            SampleFilter {
                session_id: None,
                since_ms: since.timestamp_millis(),
            },
        )
    }

    /// Like [`Database::read_since`], restricted to one session.
    pub fn read_session_since(&self, session_id: &str, since: DateTime<Utc>) -> SampleCursor {
        SampleCursor::new(
            self.clone(),
            SampleFilter {
                session_id: Some(session_id.to_string()),
                since_ms: since.timestamp_millis(),
            },
        )
    }

    /// Deletes samples recorded strictly before `older_than` and returns how many went.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff_ms = older_than.timestamp_millis();
        self.execute(move |conn| {
            let tx = conn.transaction().map_err(write_error)?;

            let (count, bytes): (i64, i64) = tx
                .query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(48 + length(CAST(session_id AS BLOB)) + length(CAST(source_id AS BLOB))), 0)
                     FROM samples
                     WHERE recorded_at_ms < ?1",
                    params![cutoff_ms],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(read_error)?;

            if count == 0 {
                return Ok(0);
            }

            tx.execute(
                "DELETE FROM samples WHERE recorded_at_ms < ?1",
                params![cutoff_ms],
            )
            .map_err(write_error)?;

            tx.execute(
                "UPDATE store_stats
                 SET sample_count = MAX(sample_count - ?1, 0),
                     approx_bytes = MAX(approx_bytes - ?2, 0),
                     pruned_total = pruned_total + ?1
                 WHERE id = 1",
                params![count, bytes],
            )
            .map_err(write_error)?;

            tx.commit().map_err(write_error)?;
            to_u64(count, "pruned count")
        })
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.execute(|conn| {
            let (sample_count, approx_bytes, pruned_total): (i64, i64, i64) = conn
                .query_row(
                    "SELECT sample_count, approx_bytes, pruned_total FROM store_stats WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(read_error)?;
            let page_count: i64 = conn
                .pragma_query_value(None, "page_count", |row| row.get(0))
                .map_err(read_error)?;
            let page_size: i64 = conn
                .pragma_query_value(None, "page_size", |row| row.get(0))
                .map_err(read_error)?;

            Ok(StoreStats {
                sample_count: to_u64(sample_count, "sample_count")?,
                approx_bytes: to_u64(approx_bytes, "approx_bytes")?,
                pruned_total: to_u64(pruned_total, "pruned_total")?,
                page_bytes: to_u64(page_count.saturating_mul(page_size), "page_bytes")?,
            })
        })
        .await
    }

    pub async fn sample_count(&self) -> Result<u64, StoreError> {
        Ok(self.stats().await?.sample_count)
    }

    /// Most recent committed sample of a session.
    pub async fn last_sample(&self, session_id: &str) -> Result<Option<Sample>, StoreError> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SAMPLE_COLUMNS} FROM samples
                     WHERE session_id = ?1
                     ORDER BY seq DESC
                     LIMIT 1"
                ))
                .map_err(read_error)?;

            let mut rows = stmt.query(params![session_id]).map_err(read_error)?;
            match rows.next().map_err(read_error)? {
                Some(row) => Ok(Some(row_to_sample(row)?.1)),
                None => Ok(None),
            }
        })
        .await
    }

    pub(crate) async fn max_seq(&self) -> Result<i64, StoreError> {
        self.execute(|conn| {
            conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM samples", [], |row| {
                row.get(0)
            })
            .map_err(read_error)
        })
        .await
    }

    pub(crate) async fn fetch_page(
        &self,
        filter: SampleFilter,
        after_seq: i64,
        upper_seq: i64,
        limit: usize,
    ) -> Result<Vec<(i64, Sample)>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {SAMPLE_COLUMNS} FROM samples
                     WHERE seq > ?1
                       AND seq <= ?2
                       AND recorded_at_ms >= ?3
                       AND (?4 IS NULL OR session_id = ?4)
                     ORDER BY seq ASC
                     LIMIT ?5"
                ))
                .map_err(read_error)?;

            let mut rows = stmt
                .query(params![
                    after_seq,
                    upper_seq,
                    filter.since_ms,
                    filter.session_id,
                    limit
                ])
                .map_err(read_error)?;

            let mut page = Vec::new();
            while let Some(row) = rows.next().map_err(read_error)? {
                page.push(row_to_sample(row)?);
            }
            Ok(page)
        })
        .await
    }
}
