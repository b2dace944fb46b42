//! slurmgate
//!
//! Loads tenants, lays out the working directory, and keeps scheduler job
//! properties fresh until interrupted.

use std::sync::Arc;

use anyhow::Result;
use slurmgate::config::Config;
use slurmgate::{Orchestrator, ReconcilerConfig, SbatchRenderer};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // RUST_LOG wins over SLURMGATE_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting slurmgate");
    info!(
        working_dir = %config.working_dir.display(),
        scheduler = %config.scheduler,
        reconcile_interval_secs = config.reconcile_interval_secs,
        tenants = config.tenants.len(),
        "Configuration loaded"
    );
    if config.tenants.is_empty() {
        warn!("No tenants configured, set SLURMGATE_TENANTS_FILE");
    }

    let scheduler = config.scheduler_client()?;
    let orchestrator = Orchestrator::new(
        &config.working_dir,
        &config.tenants,
        scheduler,
        Arc::new(SbatchRenderer::new()),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut reconciler_handle = orchestrator.spawn_reconciler(
        ReconcilerConfig {
            interval: config.reconcile_interval(),
        },
        shutdown_rx,
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
        result = &mut reconciler_handle => {
            match result {
                Ok(()) => info!("Reconciler exited"),
                Err(e) => error!(error = %e, "Reconciler task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !reconciler_handle.is_finished() {
        if let Err(e) = reconciler_handle.await {
            error!(error = %e, "Reconciler task panicked during shutdown");
        }
    }

    info!("slurmgate shutdown complete");
    Ok(())
}
