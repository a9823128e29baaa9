//! Main controller implementation.
//!
//! Wires the host access layer, the drain coordinator and the Kubernetes
//! stores together, bootstraps this node's `SriovFecNodeConfig`, then runs
//! the watcher next to the metrics/probe server.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::KubeNodeConfigStore;
use crate::watcher::{Context, watch_node_config};
use accelerator_host::{
    AcceleratorDiscoveryConfig, HostCommandRunner, InventoryProbe, KernelController, NodeConfigurator,
    SysfsPciBus,
};
use crds::SriovFecNodeConfig;
use kube::{Api, Client};
use node_drain::{DrainCoordinator, KubeLeaseStore, KubeNodeDrainer};
use std::sync::Arc;
use telemetry::{Metrics, Readiness};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// SR-IOV FEC node daemon.
pub struct Controller {
    node_config_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), telemetry::TelemetryError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing SR-IOV FEC daemon for node {}", config.node_name);

        let client = Client::try_default().await?;

        let whitelist = Arc::new(AcceleratorDiscoveryConfig::load(&config.discovery_config)?);
        let bus = Arc::new(SysfsPciBus::new(&config.sysfs_root));
        let host = Arc::new(HostCommandRunner::chrooted(&config.host_root));
        let tools = Arc::new(HostCommandRunner::local());

        tokio::fs::create_dir_all(&config.workdir)
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("workdir {}: {e}", config.workdir.display())))?;

        let probe = InventoryProbe::new(bus.clone(), whitelist);
        let configurator = NodeConfigurator::new(probe.clone(), bus, host.clone(), tools, &config.workdir)
            .with_pf_bb_config(&config.pf_bb_config);
        let kernel = KernelController::new(&config.host_root, host);

        let coordinator = DrainCoordinator::new(
            config.drain.clone(),
            Arc::new(KubeLeaseStore::new(
                client.clone(),
                &config.namespace,
                config.drain.lease_name.clone(),
            )),
            Arc::new(KubeNodeDrainer::new(client.clone())),
        );

        let store = KubeNodeConfigStore::new(client.clone(), &config.namespace);
        let reconciler = Reconciler::new(
            &config.node_name,
            Arc::new(store),
            probe,
            configurator,
            kernel,
            Arc::new(coordinator),
        );

        // The node config must exist before the name-restricted watch can see it
        reconciler.ensure_node_config().await?;

        let metrics = Metrics::new()?;
        let readiness = Readiness::new();
        let ctx = Arc::new(Context {
            reconciler,
            metrics: metrics.clone(),
            resync_period: config.resync_period,
        });

        let api: Api<SriovFecNodeConfig> = Api::namespaced(client, &config.namespace);
        let node_config_watcher = tokio::spawn(watch_node_config(api, ctx));

        let probe_server = {
            let readiness = readiness.clone();
            tokio::spawn(async move { telemetry::serve(config.metrics_addr, metrics, readiness).await })
        };
        readiness.set_ready();

        Ok(Self {
            node_config_watcher,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("SR-IOV FEC daemon running");

        tokio::select! {
            result = self.node_config_watcher => {
                match result {
                    Ok(Ok(())) => info!("SriovFecNodeConfig watcher stopped"),
                    Ok(Err(e)) => {
                        error!("SriovFecNodeConfig watcher failed: {}", e);
                        return Err(e);
                    }
                    Err(e) => error!("SriovFecNodeConfig watcher panicked: {}", e),
                }
            }
            result = self.probe_server => {
                match result {
                    Ok(Ok(())) => info!("Probe server stopped"),
                    Ok(Err(e)) => {
                        error!("Probe server failed: {}", e);
                        return Err(e.into());
                    }
                    Err(e) => error!("Probe server panicked: {}", e),
                }
            }
        }

        Ok(())
    }
}
