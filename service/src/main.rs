//! `projection-relay`: applies relayed domain events to the read store.

use anyhow::Context;
use relay_service::{Config, telemetry};
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env().context("Invalid configuration")?;
    telemetry::init(config.log_format).context("Failed to install tracing subscriber")?;

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }
    tracing::info!(
        brokers = %config.kafka.bootstrap_servers,
        group_id = %config.kafka.group_id,
        topics = ?config.kafka.topics,
        error_policy = config.consumer.error_policy.as_str(),
        "Starting projection relay"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match relay_service::run(&config, shutdown_rx).await {
        Ok(summary) => {
            tracing::info!(?summary, "Projection relay stopped");
            Ok(())
        }
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "Projection relay failed");
            Err(error)
        }
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, finishing the current message"),
        () = terminate => tracing::info!("Received SIGTERM, finishing the current message"),
    }
}
