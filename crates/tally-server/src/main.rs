//! Tally Server - HTTP trigger entry point

use anyhow::Result;
use std::time::Duration;
use tally_common::logging::{init_logging, LogConfig};
use tally_ingest::config::IngestConfig;
use tally_server::{api, config::ServerConfig};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .log_file_prefix("tally-server")
        .filter_directives("tally_server=debug,tally_ingest=info,tower_http=info")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting Tally Server");

    let config = ServerConfig::load()?;
    let ingest_config = IngestConfig::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.host, config.port
    );

    let state = api::AppState::from_config(&config, &ingest_config).await?;
    info!(
        tenant = %ingest_config.tenant,
        endpoints = state.endpoints.len(),
        "Ingestion stack initialized"
    );

    let app = api::create_router(state);

    let addr = config.addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // In-flight runs keep going until the server stops accepting; give them a moment.
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
