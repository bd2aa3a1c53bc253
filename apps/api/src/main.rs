//! # Meridian API server
//!
//! ```text
//!   meridian-api [--config <path>]
//!
//!   config ─► Database::new (migrations) ─► router ─► axum::serve
//!                                                    (graceful on Ctrl+C / SIGTERM)
//! ```

use std::path::PathBuf;

use anyhow::Context;
use meridian_api::{router, ApiConfig, AppState};
use meridian_db::Database;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meridian=debug")),
        )
        .with_target(true)
        .init();

    info!("Starting Meridian API server...");

    let config = ApiConfig::load(config_path_from_args()).context("loading configuration")?;
    let addr = config.bind_addr()?;
    info!(
        %addr,
        db = %config.database.path.display(),
        "Configuration loaded"
    );

    let db = Database::new(config.db_config())
        .await
        .context("opening database")?;

    if config.server.allow_anonymous {
        warn!("Anonymous callers allowed: requests without X-User-Id act as admin");
    }
    let state = AppState::new(db.clone()).allow_anonymous(config.server.allow_anonymous);
    let app = router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `--config <path>` or `--config=<path>`.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
