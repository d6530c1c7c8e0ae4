//! Error types for value sources.

use thiserror::Error;

/// Failure to obtain the raw value from the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The source answered with a non-success status.
    #[error("Source returned status {0}")]
    Status(u16),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for the source.
    #[error("Request timed out")]
    Timeout,

    /// The page loaded but the value could not be located in it.
    #[error("Value not found in response")]
    NotFound,

    /// A scripted source has nothing left to replay.
    #[error("Source exhausted")]
    Exhausted,
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

/// The raw text is not a number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot parse '{raw}' as a number")]
pub struct ParseError {
    pub raw: String,
}

impl ParseError {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

/// Failure to construct a source from its configuration.
#[cfg(feature = "http")]
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Extraction pattern must contain a capture group")]
    MissingCaptureGroup,
}
