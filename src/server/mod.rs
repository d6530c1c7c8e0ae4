//! Network front-ends: the JSON query API and the live sample stream.
//!
//! Both listeners share an [`AppState`] and stop when the shutdown signal
//! fires.

pub mod http;
pub mod metrics;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use crate::hub::Hub;
use crate::ingest::IngestStats;
use crate::query::QueryService;

/// Everything a request handler can reach.
#[derive(Debug, Clone)]
pub struct AppState {
    pub query: QueryService,
    pub hub: Arc<Hub>,
    pub ingest: Arc<IngestStats>,
    /// Prefix for exported metric names.
    pub metrics_namespace: Option<String>,
}

impl AppState {
    pub fn new(query: QueryService, hub: Arc<Hub>, ingest: Arc<IngestStats>) -> Self {
        Self {
            query,
            hub,
            ingest,
            metrics_namespace: None,
        }
    }

    pub fn with_metrics_namespace(mut self, namespace: Option<String>) -> Self {
        self.metrics_namespace = namespace;
        self
    }
}

/// Limits for the live stream listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Maximum concurrent subscribers.
    pub max_clients: usize,
    /// Events buffered per subscriber before it is dropped as too slow.
    pub queue_depth: usize,
    /// Upper bound on writing one frame to a client.
    pub send_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_clients: 100,
            queue_depth: 64,
            send_timeout: Duration::from_secs(5),
        }
    }
}
