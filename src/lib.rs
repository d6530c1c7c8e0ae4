//! # moodwatch
//!
//! Samples a single scalar "mood index" from a web page on a fixed cadence,
//! keeps the series in SQLite, streams every change to live subscribers and
//! answers historical queries over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   fetch    ┌───────────────┐  append   ┌──────────────┐
//! │ ValueSource  │◀───────────│  IngestLoop   │──────────▶│ SampleStore  │
//! │ (HTTP page)  │            │ (reference,   │           │  (SQLite)    │
//! └──────────────┘            │  classify)    │           └──────┬───────┘
//!                             └──────┬────────┘                  │ read
//!                                    │ publish                   ▼
//!                             ┌──────▼────────┐           ┌──────────────┐
//!                             │      Hub      │           │ QueryService │
//!                             │ (subscribers) │           │              │
//!                             └──────┬────────┘           └──────┬───────┘
//!                                    │                           │
//!                             WebSocket stream             JSON HTTP API
//! ```
//!
//! - **[`ingest`]**: the ticking loop; owns the reference value and decides
//!   whether a fetched value becomes a sample
//! - **[`store`]**: append-only [`SampleStore`](store::SampleStore) and its
//!   SQLite implementation
//! - **[`hub`]**: registry of live subscribers with ordered delivery
//! - **[`query`]**: pagination, range and aggregate queries plus parameter
//!   parsing
//! - **[`server`]**: the hyper API, the tungstenite stream and metrics export
//! - **[`config`]**: layered settings (file, then environment)
//!
//! Classification and the sample types live in `moodwatch-types`; value
//! sources live in `moodwatch-adapters`.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use moodwatch::{Clock, CycleOutcome, Hub, IngestConfig, IngestLoop, SqliteStore, SystemClock};
//! use moodwatch_adapters::ReplaySource;
//!
//! # tokio_test::block_on(async {
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
//! let hub = Arc::new(Hub::new(store.clone(), clock));
//!
//! let mut ingest = IngestLoop::new(
//!     Arc::new(ReplaySource::values(["61.2", "61.2"])),
//!     store,
//!     hub,
//!     IngestConfig::default(),
//! );
//!
//! assert!(matches!(ingest.run_cycle().await, Ok(CycleOutcome::Accepted(_))));
//! assert!(matches!(ingest.run_cycle().await, Ok(CycleOutcome::Unchanged(_))));
//! # });
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod query;
pub mod server;
pub mod shutdown;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use error::{CycleError, DeliveryError, PersistenceError, QueryError};
pub use hub::{ChannelSink, Hub, Sink, SubscriptionHandle};
pub use ingest::{CycleOutcome, IngestConfig, IngestHandle, IngestLoop};
pub use query::QueryService;
pub use store::{SampleStore, SqliteStore};
