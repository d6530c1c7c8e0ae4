use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use moodwatch::config::{Settings, SourceSettings};
use moodwatch::server::{self, AppState};
use moodwatch::shutdown::Shutdown;
use moodwatch::{Clock, Hub, IngestLoop, QueryService, SqliteStore, SystemClock};
use moodwatch_adapters::http::HttpSource;

#[derive(Parser, Debug)]
#[command(name = "moodwatch")]
#[command(about = "Samples a mood index, stores the series and streams every change")]
#[command(version)]
struct Args {
    /// Configuration file (TOML). Defaults to ./moodwatch.toml if present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the configuration
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "moodwatch=debug")
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        settings.store.path = db;
    }
    if let Some(level) = args.log_level {
        settings.log.level = level;
    }

    init_tracing(&settings.log.level);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(
        SqliteStore::open(&settings.store.path, clock.clone()).with_context(|| {
            format!("Failed to open sample store at {}", settings.store.path.display())
        })?,
    );
    let hub = Arc::new(Hub::new(store.clone(), clock.clone()));

    let source = build_source(&settings.source)?;
    let ingest = IngestLoop::new(
        Arc::new(source),
        store.clone(),
        hub.clone(),
        settings.ingest.to_config(),
    );

    let state = Arc::new(
        AppState::new(
            QueryService::new(store.clone(), clock),
            hub.clone(),
            ingest.stats(),
        )
        .with_metrics_namespace(settings.server.metrics_namespace.clone()),
    );

    let http_listener = TcpListener::bind(&settings.server.http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP API on {}", settings.server.http_addr))?;
    let stream_listener = TcpListener::bind(&settings.server.stream_addr)
        .await
        .with_context(|| format!("Failed to bind stream on {}", settings.server.stream_addr))?;

    let shutdown = Shutdown::new();
    let http = tokio::spawn(server::http::serve(
        http_listener,
        state,
        shutdown.subscribe(),
    ));
    let stream = tokio::spawn(server::stream::serve(
        stream_listener,
        hub.clone(),
        settings.server.stream_config(),
        shutdown.subscribe(),
    ));
    let ingest = ingest.start();

    wait_for_signal().await;
    info!("Shutting down");

    shutdown.trigger();
    ingest.stop().await?;

    for (name, task) in [("http", http), ("stream", stream)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(listener = name, error = %e, "Listener failed"),
            Err(e) => warn!(listener = name, error = %e, "Listener task panicked"),
        }
    }
    hub.close_all();

    info!("Stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_source(settings: &SourceSettings) -> Result<HttpSource> {
    let mut builder = HttpSource::builder()
        .url(&settings.url)
        .timeout(Duration::from_secs(settings.timeout_secs));
    if let Some(pattern) = &settings.pattern {
        builder = builder.pattern(pattern);
    }
    if let Some(user_agent) = &settings.user_agent {
        builder = builder.user_agent(user_agent);
    }

    builder.build().context("Invalid source configuration")
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
