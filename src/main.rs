// =============================================================================
// Candle Feed — Main Entry Point
// =============================================================================
//
// Streams one Binance USD-M futures instrument, folds trades into 1-second
// candles, keeps the top of the book and the latest open interest, and serves
// all three over HTTP while completed records go to the configured store.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod config;
mod ingest;
mod market_data;
mod persistence;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::SharedState;
use crate::binance::{BinanceFuturesClient, BinanceFuturesSource};
use crate::config::FeedConfig;
use crate::ingest::{Ingestor, Supervisor};
use crate::persistence::{build_sink, Persister};

const DEFAULT_CONFIG_PATH: &str = "feed_config.json";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Candle Feed — Starting Up                         ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("CANDLE_FEED_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = FeedConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        FeedConfig::default()
    });
    config.apply_env();
    config.validate().context("invalid feed configuration")?;

    let symbol = config.exchange_symbol();
    info!(
        symbol = %symbol,
        bind_addr = %config.bind_addr,
        book_depth = config.book_depth,
        backend = %config.persistence.backend,
        "Configuration ready"
    );

    // ── 2. Shared state & persistence ────────────────────────────────────
    let state = Arc::new(SharedState::new(config.book_depth));

    let sink = build_sink(&config.persistence)?;
    let persister = Persister::from_config(sink, &config.persistence);

    // ── 3. Ingestion supervisor ──────────────────────────────────────────
    let rest = BinanceFuturesClient::new(&config.rest_base_url)?;
    let source = BinanceFuturesSource::new(
        &config.stream_base_url,
        &symbol,
        rest,
        config.open_interest_poll_interval(),
    );
    let ingestor = Ingestor::new(
        state.clone(),
        persister,
        config.persistence.persist_unchanged_books,
    );
    let supervisor = Supervisor::new(source, ingestor, config.reconnect.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest_task = tokio::spawn(supervisor.run(shutdown_rx.clone()));

    // ── 4. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    let mut api_shutdown = shutdown_rx;
    let api_task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = api_shutdown.wait_for(|stop| *stop).await;
        });
        if let Err(e) = serve.await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = ingest_task.await;
        let _ = api_task.await;
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Tasks did not stop in time, exiting anyway");
    }

    info!("Candle Feed shut down complete.");
    Ok(())
}
