//! Fleet Presence Server - Binary Entry Point
//!
//! Serves the WebSocket gateway and REST API over HTTP.

use std::sync::Arc;

use fleet_presence::{create_router, AppState, MemoryStore, ServerConfig, ServerResult, Store};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ServerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let store: Arc<dyn Store> = match &config.data_file {
        Some(path) => {
            let store = MemoryStore::with_file_path(path)?;
            info!(path = %path.display(), "loaded store journal");
            Arc::new(store)
        }
        None => {
            info!("running with in-memory store only");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = config.addr();
    info!(
        name = fleet_presence::NAME,
        version = fleet_presence::VERSION,
        cors_origins = ?config.cors_origins,
        body_limit_bytes = config.body_limit_bytes,
        "starting fleet presence server"
    );

    let state = Arc::new(AppState::new(store, config));
    let app = create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    info!("shutdown signal received");
}
