//! Error types for the storage, query and distribution layers.
//!
//! Fetch and parse failures live in `moodwatch-adapters`.

use thiserror::Error;

/// The sample store could not complete an operation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// SQLite rejected the operation.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The operation did not finish within its deadline.
    #[error("Storage operation timed out")]
    Timeout,

    /// The blocking task running the operation panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        PersistenceError::Task(err.to_string())
    }
}

/// A query was malformed. Surfaces to HTTP callers as a 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// `/samples/range` needs both bounds.
    #[error("Start and end dates are required")]
    MissingRange,

    /// A parameter could not be parsed or is out of range.
    #[error("Invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl QueryError {
    pub(crate) fn invalid(name: &'static str, value: &str, reason: &'static str) -> Self {
        QueryError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}

/// A sink could not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's queue is full.
    #[error("Subscriber queue is full")]
    Full,

    /// The subscriber has gone away.
    #[error("Subscriber disconnected")]
    Closed,
}

/// Why an ingestion cycle produced no sample.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The source could not be read.
    #[error(transparent)]
    Fetch(#[from] moodwatch_adapters::FetchError),

    /// The source answered with something that isn't a number.
    #[error(transparent)]
    Parse(#[from] moodwatch_adapters::ParseError),

    /// The sample could not be stored.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CycleError {
    /// Short label used for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) => "fetch",
            CycleError::Parse(_) => "parse",
            CycleError::Persistence(_) => "persistence",
        }
    }
}
