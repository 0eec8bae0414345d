use anyhow::{Context, Result};
use clap::Parser;
use metrix_server::app;
use metrix_server::config::{ServerArgs, ServerConfig};
use metrix_server::state::{open_storage, AppState};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metrix=info".parse()?))
        .init();

    let config = ServerConfig::from_args(ServerArgs::parse())?;
    let storage = open_storage(&config).context("failed to open storage")?;
    let state = AppState::from_config(&config, storage.engine.clone())?;
    tracing::info!(
        address = %config.address,
        signed = state.signer.is_enabled(),
        decrypting = state.decryptor.is_some(),
        trusted_subnet = ?state.trusted_subnet,
        "metrix-server starting"
    );

    let token = CancellationToken::new();
    let flusher = storage
        .file
        .as_ref()
        .and_then(|file| file.spawn_flusher(token.clone()));

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    tokio::spawn(shutdown_signal(token.clone()));
    let shutdown = token.clone();
    if let Err(e) = axum::serve(listener, app::build_http_app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }

    token.cancel();
    if let Some(handle) = flusher {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Snapshot flusher panicked");
        }
    }
    if let Err(e) = storage.engine.close() {
        tracing::error!(error = %e, "Failed to close storage");
    }
    tracing::info!("metrix-server stopped");
    Ok(())
}
