//! Deliberation Engine (agora-de) - Main entry point
//!
//! Hosts the tiered elimination voting engine behind a REST API with an
//! SSE event stream, and runs the background deadline scheduler.

use std::net::SocketAddr;
use std::path::PathBuf;

use agora_common::config::{database_path, resolve_root_folder};
use agora_common::db::init::init_database;
use agora_common::events::EventBus;
use agora_de::{build_router, scheduler, AppState};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for agora-de
#[derive(Parser, Debug)]
#[command(name = "agora-de")]
#[command(about = "Deliberation Engine microservice for Agora")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5730", env = "AGORA_DE_PORT")]
    port: u16,

    /// Root folder containing the shared database
    #[arg(short, long, env = "AGORA_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora_de=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting Agora Deliberation Engine (agora-de) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let cli_root = args.root_folder.as_ref().map(|p| p.to_string_lossy().to_string());
    let root_folder = resolve_root_folder(cli_root.as_deref(), "AGORA_ROOT_FOLDER", Some("root_folder"))
        .context("Failed to resolve root folder")?;
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = database_path(&root_folder);
    info!("Database path: {}", db_path.display());
    let db = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let events = EventBus::new(100);

    tokio::spawn(scheduler::run(db.clone(), events.clone()));

    let state = AppState::new(db, events);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("agora-de listening on http://{}", addr);
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
