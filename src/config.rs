//! Runtime configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed `MOODWATCH_` with `__` between sections,
//! for example `MOODWATCH_SERVER__HTTP_ADDR=127.0.0.1:8080`.
//!
//! ```toml
//! [source]
//! url = "https://www.tickertape.in/market-mood-index"
//!
//! [ingest]
//! interval_secs = 15
//!
//! [store]
//! path = "moodwatch.db"
//!
//! [server]
//! http_addr = "0.0.0.0:3000"
//! stream_addr = "0.0.0.0:3001"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::ingest::IngestConfig;
use crate::server::StreamConfig;

/// File read when no `--config` is given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "moodwatch.toml";

const ENV_PREFIX: &str = "MOODWATCH";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source: SourceSettings,
    pub ingest: IngestSettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub log: LogSettings,
}

/// Where the raw value comes from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub url: String,
    /// Extraction regex; its first capture group is the value.
    pub pattern: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: moodwatch_adapters::http::DEFAULT_URL.to_string(),
            pattern: None,
            timeout_secs: 20,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub persist_timeout_secs: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        let defaults = IngestConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            fetch_timeout_secs: defaults.fetch_timeout.as_secs(),
            persist_timeout_secs: defaults.persist_timeout.as_secs(),
        }
    }
}

impl IngestSettings {
    pub fn to_config(&self) -> IngestConfig {
        IngestConfig::builder()
            .interval(Duration::from_secs(self.interval_secs))
            .fetch_timeout(Duration::from_secs(self.fetch_timeout_secs))
            .persist_timeout(Duration::from_secs(self.persist_timeout_secs))
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("moodwatch.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub http_addr: String,
    pub stream_addr: String,
    pub max_subscribers: usize,
    pub queue_depth: usize,
    pub send_timeout_ms: u64,
    /// Prefix for exported metric names.
    pub metrics_namespace: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            http_addr: "0.0.0.0:3000".to_string(),
            stream_addr: "0.0.0.0:3001".to_string(),
            max_subscribers: stream.max_clients,
            queue_depth: stream.queue_depth,
            send_timeout_ms: stream.send_timeout.as_millis() as u64,
            metrics_namespace: None,
        }
    }
}

impl ServerSettings {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            max_clients: self.max_subscribers,
            queue_depth: self.queue_depth,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or [`DEFAULT_CONFIG_FILE`] if present) and
    /// the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
