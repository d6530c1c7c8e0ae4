//! SQLite-backed sample store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use moodwatch_types::{Aggregate, Sample, Status};

use super::{ListQuery, SampleStore, Window};
use crate::clock::Clock;
use crate::error::PersistenceError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS samples (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        value       REAL    NOT NULL,
        status      TEXT    NOT NULL CHECK (status IN ('up', 'down', 'same')),
        recorded_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_samples_recorded_at ON samples (recorded_at);
";

const COLUMNS: &str = "id, value, status, recorded_at";

/// Sample store on a single SQLite connection.
///
/// `recorded_at` is kept as epoch milliseconds. The store never hands out a
/// timestamp earlier than the previous append, even if the clock steps back.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    /// Millisecond timestamp of the newest row.
    last_recorded_ms: Mutex<Option<i64>>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.as_ref().display(), journal_mode = %mode, "Opened sample store");
        Self::init(conn, clock)
    }

    /// A throwaway in-memory store.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA)?;
        let last: Option<i64> =
            conn.query_row("SELECT MAX(recorded_at) FROM samples", [], |row| row.get(0))?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            last_recorded_ms: Mutex::new(last),
        })
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("last_recorded_ms", &*self.last_recorded_ms.lock())
            .finish()
    }
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let status: String = row.get(2)?;
    let status = status
        .parse::<Status>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    let ms: i64 = row.get(3)?;
    let recorded_at =
        DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(3, ms))?;

    Ok(Sample {
        id: row.get(0)?,
        value: row.get(1)?,
        status,
        recorded_at,
    })
}

fn lower_bound(ts: Option<DateTime<Utc>>) -> i64 {
    ts.map_or(i64::MIN, |t| t.timestamp_millis())
}

fn upper_bound(ts: Option<DateTime<Utc>>) -> i64 {
    ts.map_or(i64::MAX, |t| t.timestamp_millis())
}

impl SampleStore for SqliteStore {
    fn append(&self, value: f64, status: Status) -> Result<Sample, PersistenceError> {
        let conn = self.conn.lock();
        let mut last = self.last_recorded_ms.lock();

        let now_ms = self.clock.now().timestamp_millis();
        let recorded_ms = last.map_or(now_ms, |prev| now_ms.max(prev));

        conn.execute(
            "INSERT INTO samples (value, status, recorded_at) VALUES (?1, ?2, ?3)",
            params![value, status.as_str(), recorded_ms],
        )?;
        let id = conn.last_insert_rowid();
        *last = Some(recorded_ms);

        let recorded_at = DateTime::from_timestamp_millis(recorded_ms)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(3, recorded_ms))?;

        Ok(Sample {
            id,
            value,
            status,
            recorded_at,
        })
    }

    fn latest(&self) -> Result<Option<Sample>, PersistenceError> {
        let conn = self.conn.lock();
        let sample = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM samples ORDER BY recorded_at DESC, id DESC LIMIT 1"),
                [],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    fn list(&self, query: &ListQuery) -> Result<(Vec<Sample>, u64), PersistenceError> {
        let conn = self.conn.lock();
        let since = lower_bound(query.since);

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE recorded_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;

        let order = query.order.sql();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM samples WHERE recorded_at >= ?1 \
             ORDER BY recorded_at {order}, id {order} LIMIT ?2 OFFSET ?3"
        ))?;
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);
        let items = stmt
            .query_map(params![since, query.page_size, offset], row_to_sample)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((items, total.max(0) as u64))
    }

    fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Sample>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM samples WHERE recorded_at >= ?1 AND recorded_at <= ?2 \
             ORDER BY recorded_at ASC, id ASC LIMIT ?3"
        ))?;
        let items = stmt
            .query_map(
                params![start.timestamp_millis(), end.timestamp_millis(), limit],
                row_to_sample,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn aggregate(&self, window: Window) -> Result<Aggregate, PersistenceError> {
        let conn = self.conn.lock();
        let aggregate = conn.query_row(
            "SELECT COUNT(*), AVG(value), MAX(value), MIN(value) FROM samples \
             WHERE recorded_at >= ?1 AND recorded_at < ?2",
            params![lower_bound(window.since), upper_bound(window.until)],
            |row| {
                let count: i64 = row.get(0)?;
                if count == 0 {
                    return Ok(Aggregate::default());
                }
                Ok(Aggregate {
                    count: count as u64,
                    average: row.get::<_, Option<f64>>(1)?.unwrap_or_default(),
                    max: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                    min: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                })
            },
        )?;
        Ok(aggregate)
    }

    fn count(&self, window: Window) -> Result<u64, PersistenceError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE recorded_at >= ?1 AND recorded_at < ?2",
            params![lower_bound(window.since), upper_bound(window.until)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}
