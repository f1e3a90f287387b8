//! Bill verification backbone - worker entry point.
//!
//! Starts the upload pipeline worker and the retention worker against the
//! configured Postgres store. The HTTP surface runs as a separate
//! collaborator process and talks to the same store.

use anyhow::Context;
use beleg::{logging, AppState, Config};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting bill verification workers"
    );

    let state = init_state_with_retry(config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let upload_worker = state.upload_worker();
    let retention_worker = state.retention_worker();

    let upload_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { upload_worker.run(shutdown).await })
    };
    let retention_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { retention_worker.run(shutdown).await })
    };

    tracing::info!("workers running, press Ctrl+C to stop");
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for handle in [upload_handle, retention_handle] {
        if let Err(e) = handle.await {
            tracing::error!("worker task join error: {e}");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Retry state initialization on store connectivity errors so a worker
/// does not exit on transient startup issues.
async fn init_state_with_retry(config: Config) -> anyhow::Result<AppState> {
    let mut retry_delay = Duration::from_secs(1);
    let max_delay = Duration::from_secs(30);
    loop {
        match AppState::new(config.clone()).await {
            Ok(state) => return Ok(state),
            Err(beleg::Error::Database(e)) => {
                tracing::error!(
                    error = %e,
                    retry_in_seconds = retry_delay.as_secs(),
                    "store unavailable during startup, retrying"
                );
                sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(max_delay);
            }
            Err(e) => return Err(anyhow::anyhow!(e)).context("failed to initialize state"),
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let sigint = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigint => tracing::info!("SIGINT received, stopping workers"),
        _ = sigterm.recv() => tracing::info!("SIGTERM received, stopping workers"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("install CTRL+C handler");
    tracing::info!("shutdown signal received, stopping workers");
}
