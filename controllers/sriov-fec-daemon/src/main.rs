//! SR-IOV FEC Daemon
//!
//! Runs on every accelerator node. Reports the node's SR-IOV FEC inventory
//! in its `SriovFecNodeConfig` and drives the host to the requested PF/VF
//! layout, draining the node under a cluster-wide lease when the change is
//! disruptive.

mod config;
mod controller;
mod error;
mod reconciler;
mod store;
mod watcher;

use crate::config::Config;
use anyhow::{Context, Result};
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();
    telemetry::init_tracing();

    info!("Starting SR-IOV FEC Daemon");

    let config = Config::from_env().context("failed to load configuration")?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Namespace: {}", config.namespace);
    info!("  Resync period: {}s", config.resync_period.as_secs());
    info!("  Drain timeout: {}s", config.drain.drain_timeout.as_secs());
    info!("  Lease duration: {}s", config.drain.lease_duration.as_secs());

    let controller = Controller::new(config)
        .await
        .context("failed to initialize controller")?;
    controller.run().await?;

    Ok(())
}
