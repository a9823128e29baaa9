//! Main controller implementation.
//!
//! Starts one change watcher per input kind, the coalescing reconcile loop
//! and the metrics/probe server.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::ClusterReconciler;
use crate::store::KubeClusterStore;
use crate::watcher::{Context, forward_changes, run_reconcile_loop};
use crds::{ACCELERATOR_PRESENT_LABEL, N3000Cluster, SriovFecClusterConfig, SriovFecNodeConfig};
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::watcher;
use std::sync::Arc;
use telemetry::{Metrics, Readiness};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Cluster-wide accelerator configuration controller.
pub struct Controller {
    reconcile_loop: JoinHandle<()>,
    probe_server: JoinHandle<Result<(), telemetry::TelemetryError>>,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing cluster config controller in namespace {}", config.namespace);

        let client = Client::try_default().await?;
        let ns = config.namespace.as_str();

        let (tx, rx) = mpsc::channel(1);
        // detached; each exits once the reconcile loop drops the receiver
        forward_changes(
            "SriovFecClusterConfig",
            Api::<SriovFecClusterConfig>::namespaced(client.clone(), ns),
            watcher::Config::default(),
            tx.clone(),
        );
        forward_changes(
            "SriovFecNodeConfig",
            Api::<SriovFecNodeConfig>::namespaced(client.clone(), ns),
            watcher::Config::default(),
            tx.clone(),
        );
        forward_changes(
            "N3000Cluster",
            Api::<N3000Cluster>::namespaced(client.clone(), ns),
            watcher::Config::default(),
            tx.clone(),
        );
        forward_changes(
            "Node",
            Api::<Node>::all(client.clone()),
            watcher::Config::default().labels(ACCELERATOR_PRESENT_LABEL),
            tx,
        );

        let metrics = Metrics::new()?;
        let readiness = Readiness::new();
        let ctx = Arc::new(Context {
            reconciler: ClusterReconciler::new(
                Arc::new(KubeClusterStore::new(client, ns)),
                config.honored_cluster_config.clone(),
            ),
            metrics: metrics.clone(),
            resync_period: config.resync_period,
        });
        let reconcile_loop = tokio::spawn(run_reconcile_loop(ctx, rx));

        let probe_server = {
            let readiness = readiness.clone();
            tokio::spawn(async move { telemetry::serve(config.metrics_addr, metrics, readiness).await })
        };
        readiness.set_ready();

        Ok(Self {
            reconcile_loop,
            probe_server,
        })
    }

    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Cluster config controller running");

        tokio::select! {
            result = self.reconcile_loop => {
                if let Err(e) = result {
                    error!("Reconcile loop panicked: {}", e);
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
