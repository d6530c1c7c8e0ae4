//! # moodwatch-adapters
//!
//! Sources for the raw value moodwatch tracks.
//!
//! The ingestion loop only sees the [`ValueSource`] trait: "give me the
//! current raw text, or tell me why you couldn't". Turning that text into a
//! number is [`parse_value`]'s job, so fetch failures and parse failures stay
//! distinguishable.
//!
//! ## Sources
//!
//! - **HTTP** (`http` feature) - downloads a page and extracts the value with
//!   a regular expression
//! - **Replay** - plays back a scripted list of outcomes, for tests and demos
//!
//! ## Quick Start (HTTP)
//!
//! ```rust,no_run
//! # #[cfg(feature = "http")]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use moodwatch_adapters::http::HttpSource;
//! use moodwatch_adapters::{parse_value, ValueSource};
//!
//! let source = HttpSource::builder()
//!     .url("https://www.tickertape.in/market-mood-index")
//!     .build()?;
//!
//! let raw = source.fetch_raw().await?;
//! let value = parse_value(&raw)?;
//! println!("current value: {}", value);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod replay;

#[cfg(feature = "http")]
pub mod http;

mod parse;

pub use error::{FetchError, ParseError};
pub use parse::parse_value;
pub use replay::ReplaySource;

use async_trait::async_trait;

/// Something that can report the current raw value of the tracked metric.
///
/// Implementations should bound their own I/O; the ingestion loop also wraps
/// every call in a timeout.
#[async_trait]
pub trait ValueSource: Send + Sync {
    /// Fetch the current raw text of the metric.
    async fn fetch_raw(&self) -> Result<String, FetchError>;

    /// Human-readable description used in logs.
    fn description(&self) -> &str;
}
