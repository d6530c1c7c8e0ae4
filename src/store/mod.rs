//! Append-only sample storage.
//!
//! The store is the source of truth for every historical query. Samples are
//! appended by the ingestion loop (the only writer) and read concurrently by
//! the query service and the distribution hub.

mod sqlite;

pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moodwatch_types::{Aggregate, Sample, Status};
use tokio::task::JoinHandle;

use crate::error::PersistenceError;

/// Ordering of listed samples by `recorded_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// A time predicate over `recorded_at`: `since <= t < until`.
///
/// Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Window {
    /// Every sample ever stored.
    pub fn all_time() -> Self {
        Self::default()
    }

    /// Samples recorded at or after `since`.
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: None,
        }
    }

    /// Samples in the half-open interval `[since, until)`.
    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
        }
    }
}

/// Parameters for a paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    /// Only samples at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
    pub order: SortOrder,
}

impl ListQuery {
    /// Number of rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            since: None,
            page: 1,
            page_size: 100,
            order: SortOrder::Desc,
        }
    }
}

/// Durable, ordered, append-only record of samples.
///
/// Implementations are synchronous; async callers go through
/// [`spawn_append`] or `tokio::task::spawn_blocking`.
pub trait SampleStore: Send + Sync {
    /// Persist a new sample, assigning its id and `recorded_at`.
    fn append(&self, value: f64, status: Status) -> Result<Sample, PersistenceError>;

    /// The most recently appended sample.
    fn latest(&self) -> Result<Option<Sample>, PersistenceError>;

    /// One page of samples plus the total number matching `query.since`.
    fn list(&self, query: &ListQuery) -> Result<(Vec<Sample>, u64), PersistenceError>;

    /// Samples with `start <= recorded_at <= end`, ascending, at most `limit`.
    fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Sample>, PersistenceError>;

    /// Average, max, min and count over a window; all zero when empty.
    fn aggregate(&self, window: Window) -> Result<Aggregate, PersistenceError>;

    /// Number of samples in a window.
    fn count(&self, window: Window) -> Result<u64, PersistenceError>;
}

/// An append running on the blocking pool.
pub type AppendTask = JoinHandle<Result<Sample, PersistenceError>>;

/// Start an append on the blocking pool.
pub fn spawn_append(store: Arc<dyn SampleStore>, value: f64, status: Status) -> AppendTask {
    tokio::task::spawn_blocking(move || store.append(value, status))
}

/// Wait up to `timeout` for an append to finish.
///
/// `None` means the append is still running. Its row may yet be written, so
/// the task stays with the caller to be awaited again.
pub async fn await_append(
    task: &mut AppendTask,
    timeout: Duration,
) -> Option<Result<Sample, PersistenceError>> {
    let joined = tokio::time::timeout(timeout, task).await.ok()?;
    Some(joined.map_err(PersistenceError::from).and_then(|result| result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_offset() {
        let query = ListQuery {
            page: 2,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(query.offset(), 10);

        let first = ListQuery::default();
        assert_eq!(first.offset(), 0);
    }

    #[test]
    fn test_default_order_is_desc() {
        assert_eq!(SortOrder::default(), SortOrder::Desc);
        assert_eq!(SortOrder::Asc.sql(), "ASC");
    }

    #[tokio::test]
    async fn test_await_append_hands_back_a_slow_task() {
        use crate::clock::ManualClock;
        use chrono::TimeZone;

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory(clock).unwrap());
        let (open, gate) = std::sync::mpsc::channel::<()>();

        let writer = store.clone();
        let mut task: AppendTask = tokio::task::spawn_blocking(move || {
            let _ = gate.recv();
            writer.append(47.0, Status::Same)
        });

        assert!(await_append(&mut task, Duration::from_millis(20)).await.is_none());
        assert_eq!(store.count(Window::all_time()).unwrap(), 0);

        open.send(()).unwrap();
        let sample = await_append(&mut task, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.value, 47.0);
        assert_eq!(store.count(Window::all_time()).unwrap(), 1);
    }
}
