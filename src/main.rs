//! HomeChef webhook delivery service.
//!
//! Main entry point. Loads configuration, connects the store, starts the
//! delivery engine and the HTTP API, and drains both on shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use homechef_api::{AppState, Config, StaticTokenVerifier};
use homechef_core::{signing, Clock, MemoryStore, RealClock, Storage, Store};
use homechef_delivery::DeliveryEngine;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting HomeChef webhook delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        bind_addr = %config.bind_addr,
        workers = config.workers,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    let addr = config.parse_bind_addr()?;
    let tokens = config.parse_api_tokens()?;
    if tokens.is_empty() {
        warn!("no api tokens configured; every management route will answer 401");
    }
    let producer_tokens = config.parse_producer_tokens()?;
    if producer_tokens.is_empty() {
        warn!("no producer tokens configured; the internal event route will answer 401");
    }

    // Fail fast if endpoints could never be created.
    signing::generate_secret().context("secure random source unavailable")?;

    let (store, pool) = open_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let mut engine = DeliveryEngine::new(store, clock, config.to_engine_config())
        .context("Failed to create delivery engine")?;
    engine.start().await;

    let state = AppState::new(
        &engine,
        Arc::new(StaticTokenVerifier::new(tokens)),
        Arc::new(StaticTokenVerifier::new(producer_tokens)),
    );
    info!(%addr, "HomeChef webhooks ready");

    let served = homechef_api::start_server(state, addr, homechef_api::shutdown_signal()).await;

    let stats = engine.shutdown().await.context("Delivery engine shutdown failed")?;
    info!(
        attempts = stats.attempts_made,
        succeeded = stats.successful_deliveries,
        retries = stats.retries_scheduled,
        failed = stats.permanent_failures,
        "Delivery engine stopped"
    );

    if let Some(pool) = pool {
        pool.close().await;
        info!("Database connections closed");
    }

    served.context("HTTP server failed")?;
    info!("HomeChef webhooks shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,homechef=debug,tower_http=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Opens the configured store. PostgreSQL gets its schema applied.
async fn open_store(config: &Config) -> Result<(Arc<dyn Store>, Option<sqlx::PgPool>)> {
    if config.uses_memory_store() {
        warn!("using in-memory store; deliveries will not survive a restart");
        return Ok((Arc::new(MemoryStore::new()), None));
    }

    let pool = create_database_pool(config).await?;
    info!("Database connection pool established");

    let storage = Storage::new(pool.clone());
    storage.migrate().await.context("Failed to apply database schema")?;
    info!("Database schema ready");

    Ok((Arc::new(storage), Some(pool)))
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
