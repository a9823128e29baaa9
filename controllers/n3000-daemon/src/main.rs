//! N3000 Daemon
//!
//! Flashes FPGA user images and Fortville NIC firmware on the N3000 cards of
//! one node, as requested by its `N3000Node`.

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
    let _ = rustls::crypto::ring::default_provider().install_default();
    telemetry::init_tracing();

    info!("Starting N3000 Daemon");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        "Node {} in namespace {}, workdir {}",
        config.node_name,
        config.namespace,
        config.workdir.display()
    );

    Controller::new(config)
        .await
        .context("failed to initialize controller")?
        .run()
        .await?;

    Ok(())
}
