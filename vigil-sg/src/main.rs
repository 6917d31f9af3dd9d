//! Stream Guard (vigil-sg) - Main entry point
//!
//! Pre-emptive content suppression service for live media streams:
//! detections enter a per-stream delay buffer and fire unless overridden,
//! while repeated overrides recalibrate per-user thresholds.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_common::config::VigilConfig;
use vigil_common::events::EventBus;
use vigil_sg::analysis::{DetectionSource, HttpDetectionSource, NullSource};
use vigil_sg::api::{self, AppState};
use vigil_sg::db::{init_db, ProfileStore, SqliteStore};
use vigil_sg::engine::{LearningEngine, SessionCoordinator};

/// Command-line arguments for vigil-sg
#[derive(Parser, Debug)]
#[command(name = "vigil-sg")]
#[command(about = "Stream Guard content suppression service for Vigil")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "VIGIL_PORT")]
    port: Option<u16>,

    /// Data folder holding the Vigil database
    #[arg(short, long, default_value = "./vigil_data", env = "VIGIL_DATA_FOLDER")]
    data_folder: PathBuf,

    /// Path to a TOML config file
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_sg=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = VigilConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = args.port {
        config.api.port = port;
    }

    info!(
        "Starting Vigil Stream Guard v{} on port {}",
        env!("CARGO_PKG_VERSION"),
        config.api.port
    );
    info!(
        "Buffer delay: {}ms (requested {}ms)",
        config.buffer.effective_delay_ms(),
        config.buffer.delay_ms
    );

    // Database and profile store
    std::fs::create_dir_all(&args.data_folder).context("Failed to create data folder")?;
    let db_path = args.data_folder.join("vigil.db");
    let pool = init_db(&db_path)
        .await
        .context("Failed to initialize database")?;
    let store: Arc<dyn ProfileStore> = Arc::new(SqliteStore::new(pool));

    // Detection source: analyzer endpoint, or fail-open when none configured
    let source: Arc<dyn DetectionSource> = match &config.analysis.endpoint {
        Some(endpoint) => {
            info!("Using analyzer at {}", endpoint);
            Arc::new(HttpDetectionSource::new(endpoint.clone()))
        }
        None => {
            info!("No analyzer configured; streams pass through unfiltered");
            Arc::new(NullSource)
        }
    };

    // Engines
    let events = EventBus::new(1_000);
    let learning = Arc::new(LearningEngine::new());
    let coordinator = Arc::new(SessionCoordinator::new(
        config.clone(),
        store.clone(),
        source,
        learning.clone(),
        events.clone(),
    ));
    info!("Session coordinator initialized");

    // HTTP boundary
    let app = api::create_router(AppState {
        coordinator,
        store,
        learning,
        events,
    });

    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .context("Invalid listen address")?;
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

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
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
