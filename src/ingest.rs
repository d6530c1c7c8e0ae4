//! The ingestion loop.
//!
//! Every tick the loop fetches the raw value, parses it and compares it with
//! the last value it accepted. A changed value is classified, stored and
//! published to the hub; an unchanged value is dropped. Failures are logged
//! and leave the loop's state untouched, except that an append which misses
//! its deadline is kept and collected by the next cycle.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use moodwatch::clock::SystemClock;
//! use moodwatch::hub::Hub;
//! use moodwatch::ingest::{IngestConfig, IngestLoop};
//! use moodwatch::store::SqliteStore;
//! use moodwatch_adapters::ReplaySource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = Arc::new(SystemClock);
//!     let store = Arc::new(SqliteStore::open("moodwatch.db", clock.clone())?);
//!     let hub = Arc::new(Hub::new(store.clone(), clock));
//!
//!     let config = IngestConfig::builder()
//!         .interval(Duration::from_secs(15))
//!         .build();
//!
//!     let source = Arc::new(ReplaySource::values(["50.0", "55.0"]));
//!     let handle = IngestLoop::new(source, store, hub, config).start();
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     handle.stop().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moodwatch_adapters::{parse_value, FetchError, ValueSource};
use moodwatch_types::{classify, Sample};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{CycleError, PersistenceError};
use crate::hub::Hub;
use crate::shutdown::stopped;
use crate::store::{await_append, spawn_append, AppendTask, SampleStore};

/// Timing for the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Upper bound on a single append.
    pub persist_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(5),
        }
    }
}

impl IngestConfig {
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }
}

/// Builder for IngestConfig.
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    interval: Option<Duration>,
    fetch_timeout: Option<Duration>,
    persist_timeout: Option<Duration>,
}

impl IngestConfigBuilder {
    /// Set the tick period (default: 15 seconds).
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the fetch timeout (default: 30 seconds).
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Set the append timeout (default: 5 seconds).
    pub fn persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> IngestConfig {
        let defaults = IngestConfig::default();
        IngestConfig {
            interval: self.interval.unwrap_or(defaults.interval),
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            persist_timeout: self.persist_timeout.unwrap_or(defaults.persist_timeout),
        }
    }
}

/// What a successful cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A new sample was stored and published.
    Accepted(Sample),
    /// The value matched the reference; nothing was stored.
    Unchanged(f64),
}

/// Running totals for the loop.
#[derive(Debug, Default)]
pub struct IngestStats {
    cycles: AtomicU64,
    accepted: AtomicU64,
    unchanged: AtomicU64,
    fetch_failures: AtomicU64,
    parse_failures: AtomicU64,
    persistence_failures: AtomicU64,
    late_commits: AtomicU64,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub cycles: u64,
    pub accepted: u64,
    pub unchanged: u64,
    pub fetch_failures: u64,
    pub parse_failures: u64,
    pub persistence_failures: u64,
    /// Timed-out appends whose rows landed afterwards and were then published.
    pub late_commits: u64,
    pub last_error: Option<String>,
}

impl IngestStats {
    fn record(&self, result: &Result<CycleOutcome, CycleError>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Ok(CycleOutcome::Accepted(_)) => &self.accepted,
            Ok(CycleOutcome::Unchanged(_)) => &self.unchanged,
            Err(CycleError::Fetch(_)) => &self.fetch_failures,
            Err(CycleError::Parse(_)) => &self.parse_failures,
            Err(CycleError::Persistence(_)) => &self.persistence_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = result {
            *self.last_error.write() = Some(e.to_string());
        }
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            late_commits: self.late_commits.load(Ordering::Relaxed),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Decides when the next cycle starts.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick.
    async fn tick(&mut self);
}

/// Fixed-period ticker. The first tick completes immediately and a late
/// cycle pushes later ticks back instead of bunching them up.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticker driven by an external channel, one tick per message.
///
/// Once every sender is gone the ticker never fires again.
#[derive(Debug)]
pub struct ChannelTicker {
    rx: mpsc::Receiver<()>,
}

impl ChannelTicker {
    pub fn channel() -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(16);
        (tx, Self { rx })
    }
}

#[async_trait]
impl Ticker for ChannelTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// The sampling loop. Owns the reference value.
pub struct IngestLoop {
    source: Arc<dyn ValueSource>,
    store: Arc<dyn SampleStore>,
    hub: Arc<Hub>,
    config: IngestConfig,
    reference: Option<f64>,
    /// Append that outlived `persist_timeout` and has not been collected.
    pending: Option<AppendTask>,
    stats: Arc<IngestStats>,
}

impl IngestLoop {
    pub fn new(
        source: Arc<dyn ValueSource>,
        store: Arc<dyn SampleStore>,
        hub: Arc<Hub>,
        config: IngestConfig,
    ) -> Self {
        Self {
            source,
            store,
            hub,
            config,
            reference: None,
            pending: None,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// The last accepted value, if any cycle has accepted one.
    pub fn reference(&self) -> Option<f64> {
        self.reference
    }

    /// Shared counters; stay valid after the loop is started.
    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Run one fetch, classify, store and publish cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let result = self.cycle().await;
        self.stats.record(&result);

        match &result {
            Ok(CycleOutcome::Accepted(sample)) => {
                info!(
                    value = sample.value,
                    status = %sample.status,
                    id = sample.id,
                    "Sample accepted"
                );
            }
            Ok(CycleOutcome::Unchanged(value)) => debug!(value, "Value unchanged"),
            Err(e @ CycleError::Persistence(_)) => error!(error = %e, "Failed to store sample"),
            Err(e) => warn!(kind = e.kind(), error = %e, "Cycle failed"),
        }

        result
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        self.settle_pending().await?;

        let raw = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch_raw())
            .await
            .unwrap_or(Err(FetchError::Timeout))?;
        let value = parse_value(&raw)?;

        if self.reference == Some(value) {
            return Ok(CycleOutcome::Unchanged(value));
        }

        let status = classify(self.reference, value);
        // A failed append still moves the reference; only the broadcast is skipped.
        self.reference = Some(value);

        let mut task = spawn_append(self.store.clone(), value, status);
        let Some(result) = await_append(&mut task, self.config.persist_timeout).await else {
            self.pending = Some(task);
            return Err(PersistenceError::Timeout.into());
        };
        let sample = result?;
        self.hub.publish(&sample);

        Ok(CycleOutcome::Accepted(sample))
    }

    /// Collect an append that timed out in an earlier cycle. A row that
    /// landed late is published before anything newer is written; one still
    /// running fails this cycle too.
    async fn settle_pending(&mut self) -> Result<(), PersistenceError> {
        let Some(mut task) = self.pending.take() else {
            return Ok(());
        };

        match await_append(&mut task, self.config.persist_timeout).await {
            Some(Ok(sample)) => {
                info!(value = sample.value, id = sample.id, "Late sample stored");
                self.stats.late_commits.fetch_add(1, Ordering::Relaxed);
                self.hub.publish(&sample);
                Ok(())
            }
            Some(Err(e)) => {
                debug!(error = %e, "Timed-out append did not complete");
                Ok(())
            }
            None => {
                self.pending = Some(task);
                Err(PersistenceError::Timeout)
            }
        }
    }

    /// Run cycles on every tick until `stop` turns true or its sender is
    /// dropped. A cycle in flight when stop arrives is abandoned.
    pub async fn run<T: Ticker>(mut self, mut ticker: T, mut stop: watch::Receiver<bool>) {
        info!(
            source = self.source.description(),
            interval = ?self.config.interval,
            "Ingestion started"
        );

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = self.run_cycle() => {}
            }
        }

        info!(reference = ?self.reference, "Ingestion stopped");
    }

    /// Spawn the loop on a fixed-period ticker.
    pub fn start(self) -> IngestHandle {
        let ticker = IntervalTicker::new(self.config.interval);
        self.start_with(ticker)
    }

    /// Spawn the loop on a caller-supplied ticker.
    pub fn start_with<T: Ticker + 'static>(self, ticker: T) -> IngestHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(ticker, stop_rx));
        IngestHandle { stop_tx, task }
    }
}

impl std::fmt::Debug for IngestLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestLoop")
            .field("source", &self.source.description())
            .field("config", &self.config)
            .field("reference", &self.reference)
            .finish()
    }
}

/// Handle for a running loop.
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct IngestHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl IngestHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.stop_tx.send(true);
        self.task.await
    }
}
