//! ppi-sync - Project sync service
//!
//! Serves the local project store over HTTP and triggers synchronization
//! runs against the external PPI registry.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ppi_common::config::{self, Config, ConfigOverrides};
use tokio::signal;
use tracing::info;

use ppi_sync::services::SourceClient;
use ppi_sync::{build_router, AppState};

/// Command-line arguments for ppi-sync
#[derive(Parser, Debug)]
#[command(name = "ppi-sync")]
#[command(about = "PPI project sync service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Curated override JSON file
    #[arg(long, value_name = "FILE")]
    overrides: Option<PathBuf>,

    /// Comma-separated fields overrides may set (default: all)
    #[arg(long, value_name = "LIST")]
    override_fields: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_toml_or_default(args.config.as_deref())
        .context("Failed to load configuration file")?;
    ppi_sync::config::init_tracing(&toml_config.logging.level);

    info!(
        "Starting PPI sync service (ppi-sync) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = Config::resolve(
        toml_config,
        ConfigOverrides {
            database_path: args.db,
            port: args.port,
            overrides_path: args.overrides,
            override_fields: args.override_fields,
        },
    )
    .context("Invalid configuration")?;

    info!("Database: {}", config.database_path.display());
    info!("Source registry: {}", config.source.base_url);

    let db_pool = ppi_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;

    let driver = ppi_sync::config::build_driver(&config).context("Failed to load overrides")?;
    let source = Arc::new(
        SourceClient::new(config.source.clone()).context("Failed to create source client")?,
    );

    let state = AppState::new(db_pool, source, driver);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
