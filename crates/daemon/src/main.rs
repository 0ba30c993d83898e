//! Lineup Queue Engine - Main Entry Point
//!
//! Composition root: wires the SQLite stores, the realtime room bus, the
//! lifecycle service, and the timeout sweeper, then waits for ctrl-c.

mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lineup_core::application::{shutdown_channel, QueueService, SweeperConfig, TokenSweeper};
use lineup_core::port::id_provider::UuidProvider;
use lineup_core::port::time_provider::SystemTimeProvider;
use lineup_infra_realtime::RoomBus;
use lineup_infra_sqlite::{
    create_pool, run_migrations, SqliteNotifier, SqliteQueueRepository, SqliteTokenRepository,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.lineup/lineup.db";

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Sweeper thresholds from the environment (minutes/seconds, with the
/// engine defaults as fallback)
fn sweeper_config_from_env() -> SweeperConfig {
    let defaults = SweeperConfig::default();
    SweeperConfig {
        called_timeout: Duration::from_secs(
            env_u64("LINEUP_CALLED_TIMEOUT_MIN", defaults.called_timeout.as_secs() / 60) * 60,
        ),
        pending_timeout: Duration::from_secs(
            env_u64("LINEUP_PENDING_TIMEOUT_MIN", defaults.pending_timeout.as_secs() / 60) * 60,
        ),
        warning_lead: Duration::from_secs(
            env_u64("LINEUP_WARNING_LEAD_MIN", defaults.warning_lead.as_secs() / 60) * 60,
        ),
        warning_lookback: defaults.warning_lookback,
        cadence: Duration::from_secs(env_u64(
            "LINEUP_SWEEP_INTERVAL_SECS",
            defaults.cadence.as_secs(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("LINEUP_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Lineup Queue Engine v{} starting...", VERSION);

    if let Err(e) = telemetry::init_telemetry() {
        tracing::warn!(error = ?e, "Failed to initialize OpenTelemetry (continuing without it)");
    }

    // 2. Load configuration
    let db_path = std::env::var("LINEUP_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());
    let sweeper_config = sweeper_config_from_env();

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let token_repo = Arc::new(SqliteTokenRepository::new(pool.clone()));
    let queue_repo = Arc::new(SqliteQueueRepository::new(pool.clone()));
    let notifier = Arc::new(SqliteNotifier::new(pool.clone(), time_provider.clone()));

    // The room bus is shared with the realtime transport layer, which
    // joins/leaves rooms per client connection
    let room_bus = Arc::new(RoomBus::default());

    let service = Arc::new(QueueService::new(
        token_repo.clone(),
        token_repo.clone(),
        queue_repo.clone(),
        notifier.clone(),
        room_bus.clone(),
        id_provider,
        time_provider.clone(),
    ));

    // 5. Start the timeout sweeper
    info!(
        called_timeout_secs = sweeper_config.called_timeout.as_secs(),
        pending_timeout_secs = sweeper_config.pending_timeout.as_secs(),
        cadence_secs = sweeper_config.cadence.as_secs(),
        "Starting timeout sweeper..."
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let sweeper = TokenSweeper::new(
        service.clone(),
        token_repo,
        queue_repo,
        notifier,
        room_bus,
        time_provider,
        sweeper_config,
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    info!("Engine ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown
    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
