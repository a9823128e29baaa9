//! Cluster Config Controller
//!
//! Single replica per cluster. Renders `SriovFecClusterConfig`s into one
//! `SriovFecNodeConfig` per accelerator node and `N3000Cluster`s into
//! `N3000Node` specs.

mod config;
mod controller;
mod error;
mod plan;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::Config;
use anyhow::{Context, Result};
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    telemetry::init_tracing();

    info!("Starting Cluster Config Controller");

    let config = Config::from_env().context("failed to load configuration")?;
    info!("  Namespace: {}", config.namespace);
    info!("  Resync period: {}s", config.resync_period.as_secs());
    if let Some(honored) = &config.honored_cluster_config {
        info!("  Honoring only SriovFecClusterConfig {}", honored);
    }

    let controller = Controller::new(config)
        .await
        .context("failed to initialize controller")?;
    controller.run().await?;

    Ok(())
}
