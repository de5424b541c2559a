//! Application entry point for the `sonoff-telemetry` service.
//!
//! This binary orchestrates the startup sequence for the telemetry
//! consolidation API:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Creating the consolidation buffer and, if a TTL is set, its stale sweep
//! - Mounting all API routes via the `routes` gateway
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`config::load_from_env`] for the remaining settings.
use std::{env, sync::Arc, time::Duration};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod buffer;
mod config;
mod error;
mod models;
mod reading;
mod routes;
mod schema;
mod store;

pub use config::Config;

// Re-exported so routes/*.rs only depend on their parent module, not on the
// individual modules that define these types.
pub use buffer::{ConsolidationBuffer, UpdateOutcome};
pub use error::IngestError;
pub use models::{CompletedRecord, DeviceReport, StoredRow, Topic, TopicMessage};
pub use store::{PgReadingStore, ReadingStore};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database: {}", cfg.masked_db_url());

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database '{}': {}",
                cfg.masked_db_url(),
                e
            )
        })?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let buffer = Arc::new(ConsolidationBuffer::new(cfg.topic_prefix.clone()));
    if let Some(ttl) = cfg.buffer_ttl {
        tokio::spawn(sweep_stale(
            Arc::clone(&buffer),
            ttl,
            cfg.buffer_sweep_interval,
        ));
    }

    let addr = cfg.bind_addr;
    let state = routes::AppState {
        store: Arc::new(PgReadingStore::new(pool.clone())),
        buffer: Arc::clone(&buffer),
        config: cfg,
    };
    let app: Router = routes::router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !buffer.is_empty() {
        let pending = buffer.pending_devices();
        tracing::warn!(
            "Shutting down with {} incomplete readings dropped: {:?}",
            pending.len(),
            pending
        );
    }
    let held = buffer.held_len();
    if held > 0 {
        tracing::warn!("Shutting down with {} unwritten readings held for retry", held);
    }
    pool.close().await;

    Ok(())
}

// ---

/// Periodically drop partial readings that stopped receiving topics.
async fn sweep_stale(buffer: Arc<ConsolidationBuffer>, ttl: Duration, every: Duration) {
    // ---
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let evicted = buffer.evict_stale(ttl);
        if !evicted.is_empty() {
            tracing::warn!(
                "Evicted {} stale partial readings ({} still pending): {:?}",
                evicted.len(),
                buffer.len(),
                evicted
            );
        }
    }
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// Call once at startup, before any logging macro runs.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
