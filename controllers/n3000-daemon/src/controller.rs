//! N3000 daemon wiring.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::{N3000Host, Reconciler};
use crate::store::KubeN3000NodeStore;
use crate::watcher::{Context, watch_n3000_node};
use accelerator_host::n3000::{FirmwareDownloader, FortvilleManager, FpgaManager};
use accelerator_host::{HostCommandRunner, KernelController};
use crds::N3000Node;
use kube::{Api, Client};
use node_drain::{DrainCoordinator, KubeLeaseStore, KubeNodeDrainer};
use std::sync::Arc;
use telemetry::{Metrics, Readiness};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct Controller {
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), telemetry::TelemetryError>>,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing N3000 daemon for node {}", config.node_name);

        let client = Client::try_default().await?;

        tokio::fs::create_dir_all(&config.workdir)
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("workdir {}: {e}", config.workdir.display())))?;

        let tools = Arc::new(HostCommandRunner::local());
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ControllerError::InvalidConfig(format!("HTTP client: {e}")))?;
        let host = N3000Host {
            fpga: FpgaManager::new(tools.clone()),
            fortville: FortvilleManager::new(tools, &config.workdir, &config.nvmupdate_package),
            fetcher: Arc::new(FirmwareDownloader::new(http, &config.workdir)),
            kernel: KernelController::new(
                &config.host_root,
                Arc::new(HostCommandRunner::chrooted(&config.host_root)),
            ),
        };

        // Same lease as the SR-IOV FEC daemon: one disruptive change per cluster
        let coordinator = DrainCoordinator::new(
            config.drain.clone(),
            Arc::new(KubeLeaseStore::new(
                client.clone(),
                &config.namespace,
                config.drain.lease_name.clone(),
            )),
            Arc::new(KubeNodeDrainer::new(client.clone())),
        );

        let reconciler = Reconciler::new(
            &config.node_name,
            Arc::new(KubeN3000NodeStore::new(client.clone(), &config.namespace)),
            host,
            Arc::new(coordinator),
        );
        reconciler.ensure_node().await?;

        let metrics = Metrics::new()?;
        let readiness = Readiness::new();
        let ctx = Arc::new(Context {
            reconciler,
            metrics: metrics.clone(),
            resync_period: config.resync_period,
        });

        let api: Api<N3000Node> = Api::namespaced(client, &config.namespace);
        let node_watcher = tokio::spawn(watch_n3000_node(api, ctx));
        let probe_server = {
            let readiness = readiness.clone();
            tokio::spawn(async move { telemetry::serve(config.metrics_addr, metrics, readiness).await })
        };
        readiness.set_ready();

        Ok(Self {
            node_watcher,
            probe_server,
        })
    }

    pub async fn run(self) -> Result<(), ControllerError> {
        info!("N3000 daemon running");

        tokio::select! {
            result = self.node_watcher => {
                match result {
                    Ok(Ok(())) => info!("N3000Node watcher stopped"),
                    Ok(Err(e)) => {
                        error!("N3000Node watcher failed: {}", e);
                        return Err(e);
                    }
                    Err(e) => error!("N3000Node watcher panicked: {}", e),
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
