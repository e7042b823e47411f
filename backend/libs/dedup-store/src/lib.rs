//! # Dedup Store
//!
//! Durable idempotency tracking for published events, keyed by
//! `(topic, event_id)`, backed by SQLite. Every event is recorded at most once
//! across concurrent workers and process restarts.
//!
//! ## Tables
//!
//! ```text
//! dedup             (topic, event_id, processed_at)             PK(topic, event_id)
//! processed_events  (topic, event_id, timestamp, source, payload) PK(topic, event_id)
//! ```
//!
//! `dedup` is the membership marker; `processed_events` is the first-seen copy
//! of each event used for listing. Both rows are written in one transaction,
//! so a `processed_events` row exists iff its `dedup` row exists.
//!
//! ## Usage
//!
//! ```ignore
//! use chrono::Utc;
//! use dedup_store::{DedupStore, NewEventRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DedupStore::open("data/dedup.sqlite").await?;
//!
//! let record = NewEventRecord {
//!     topic: "orders",
//!     event_id: "evt-1",
//!     timestamp: Utc::now(),
//!     source: "checkout",
//!     payload_json: r#"{"order_id":1}"#,
//! };
//!
//! assert!(store.mark_processed(&record).await?);   // first time
//! assert!(!store.mark_processed(&record).await?);  // duplicate, nothing written
//!
//! let orders = store.load_events(Some("orders")).await?;
//! assert_eq!(orders.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Safety
//!
//! Insert-if-absent is a single `INSERT ... ON CONFLICT DO NOTHING` against the
//! primary key; the affected row count decides whether this call won. There is
//! no existence check before the insert, so two writers racing on the same key
//! can never both report success, even from different processes sharing the
//! database file.
//!
//! Inside one process, writes are additionally serialized through an async
//! lock so SQLite never has to arbitrate between our own connections. Reads
//! do not take the lock; WAL mode lets them proceed while a write commits.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod error;

pub use error::{StorageError, StorageResult};

/// Default number of pooled SQLite connections
const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Event fields handed to [`DedupStore::mark_processed`]
#[derive(Debug, Clone, Copy)]
pub struct NewEventRecord<'a> {
    pub topic: &'a str,
    pub event_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub source: &'a str,
    /// Canonical JSON text of the payload
    pub payload_json: &'a str,
}

/// A row of `processed_events`, as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEventRow {
    pub topic: String,
    pub event_id: String,
    /// Fixed-width UTC RFC 3339 text, see [`format_timestamp`]
    pub timestamp: String,
    pub source: String,
    /// JSON text
    pub payload: String,
}

/// Row counts used to seed in-memory statistics at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    /// Rows in `processed_events`
    pub processed_events: i64,
    /// Rows in `dedup` (authoritative unique count)
    pub dedup_records: i64,
}

/// Render a timestamp the way it is persisted.
///
/// Always UTC with microsecond precision and a `Z` suffix, so string order
/// in SQL matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed idempotency store.
///
/// Cheap to clone; clones share the same pool and write lock.
#[derive(Debug, Clone)]
pub struct DedupStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl DedupStore {
    /// Open or create the store at `path` and apply migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::open_with_options(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open or create the store with an explicit connection pool size.
    pub async fn open_with_options<P: AsRef<Path>>(
        path: P,
        max_connections: u32,
    ) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening dedup store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Atomically record an event if its key has not been seen.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if this call inserted both rows (first time seen)
    /// - `Ok(false)` if the key already existed; nothing was written
    /// - `Err` on storage failure; nothing was written
    pub async fn mark_processed(&self, record: &NewEventRecord<'_>) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin dedup transaction")?;

        let marker = sqlx::query(
            r#"
            INSERT INTO dedup (topic, event_id)
            VALUES (?, ?)
            ON CONFLICT (topic, event_id) DO NOTHING
            "#,
        )
        .bind(record.topic)
        .bind(record.event_id)
        .execute(&mut *tx)
        .await
        .context("Failed to insert dedup marker")?;

        if marker.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("Failed to roll back duplicate insert")?;
            debug!(
                topic = %record.topic,
                event_id = %record.event_id,
                "Event already processed (duplicate)"
            );
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO processed_events (topic, event_id, timestamp, source, payload)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.topic)
        .bind(record.event_id)
        .bind(format_timestamp(&record.timestamp))
        .bind(record.source)
        .bind(record.payload_json)
        .execute(&mut *tx)
        .await
        .context("Failed to insert processed event")?;

        tx.commit()
            .await
            .context("Failed to commit processed event")?;

        debug!(
            topic = %record.topic,
            event_id = %record.event_id,
            "Event marked as processed"
        );

        Ok(true)
    }

    /// Load stored events ordered by timestamp, oldest first.
    ///
    /// `None` or an empty topic returns every topic. Events sharing a
    /// timestamp come back in insertion order.
    pub async fn load_events(&self, topic: Option<&str>) -> StorageResult<Vec<ProcessedEventRow>> {
        let rows = match topic.filter(|t| !t.is_empty()) {
            Some(topic) => {
                sqlx::query(
                    r#"
                    SELECT topic, event_id, timestamp, source, payload
                    FROM processed_events
                    WHERE topic = ?
                    ORDER BY timestamp ASC, rowid ASC
                    "#,
                )
                .bind(topic)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT topic, event_id, timestamp, source, payload
                    FROM processed_events
                    ORDER BY timestamp ASC, rowid ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to load processed events")?;

        let events = rows
            .into_iter()
            .map(|row| -> Result<ProcessedEventRow, sqlx::Error> {
                Ok(ProcessedEventRow {
                    topic: row.try_get("topic")?,
                    event_id: row.try_get("event_id")?,
                    timestamp: row.try_get("timestamp")?,
                    source: row.try_get("source")?,
                    payload: row.try_get("payload")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to parse processed events")?;

        debug!(count = events.len(), topic = ?topic, "Loaded processed events");

        Ok(events)
    }

    /// Row counts of both tables.
    pub async fn stats(&self) -> StorageResult<StoreCounts> {
        let processed_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_events")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count processed events")?;

        let dedup_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dedup")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count dedup records")?;

        Ok(StoreCounts {
            processed_events,
            dedup_records,
        })
    }

    /// Distinct topics with at least one stored event, sorted.
    pub async fn topics(&self) -> StorageResult<Vec<String>> {
        let topics: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT topic FROM processed_events ORDER BY topic ASC")
                .fetch_all(&self.pool)
                .await
                .context("Failed to load topics")?;

        Ok(topics)
    }

    /// Whether a key has been recorded.
    ///
    /// Read-only diagnostics. Never use this to decide whether to call
    /// [`mark_processed`](Self::mark_processed).
    pub async fn is_processed(&self, topic: &str, event_id: &str) -> StorageResult<bool> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM dedup WHERE topic = ? AND event_id = ?
            )
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check if event is processed")?;

        Ok(exists != 0)
    }

    /// Close the underlying pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp_is_fixed_width_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2025-01-01T00:00:00.000000Z");

        let later = ts + chrono::Duration::microseconds(1_500_000);
        assert_eq!(format_timestamp(&later), "2025-01-01T00:00:01.500000Z");
    }

    #[test]
    fn test_formatted_timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let c = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let mut formatted = vec![format_timestamp(&c), format_timestamp(&a), format_timestamp(&b)];
        formatted.sort();
        assert_eq!(
            formatted,
            vec![format_timestamp(&a), format_timestamp(&b), format_timestamp(&c)]
        );
    }
}
