use anyhow::Result;
use clap::Parser;
use metrix_agent::agent::Agent;
use metrix_agent::config::{AgentArgs, AgentConfig};
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

    let config = AgentConfig::from_args(AgentArgs::parse())?;
    tracing::info!(
        address = %config.address,
        poll_interval_secs = config.poll_interval_secs,
        report_interval_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        "metrix-agent starting"
    );

    let agent = Agent::new(&config)?;
    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    agent.run(token).await;
    tracing::info!("metrix-agent stopped");
    Ok(())
}
