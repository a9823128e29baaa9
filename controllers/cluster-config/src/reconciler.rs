//! Whole-cluster reconcile.
//!
//! Every pass lists the labelled nodes and all cluster-wide requests, renders
//! the per-node specs with [`crate::plan`] and writes only what differs:
//!
//! - one `SriovFecNodeConfig` per accelerator node, created when missing
//!   and deleted once its node is gone
//! - `N3000Node` specs for the nodes listed by an `N3000Cluster`
//! - a sync status on every `SriovFecClusterConfig` and `N3000Cluster`

use crate::error::ControllerError;
use crate::plan::{plan_n3000, plan_nodes, priority_order};
use crate::store::ClusterStore;
use crds::{
    N3000ClusterStatus, N3000Node, N3000NodeSpec, SriovFecClusterConfigStatus, SriovFecNodeConfig,
    SyncStatus,
};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Writes performed by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub node_configs_written: usize,
    pub node_configs_deleted: usize,
    pub n3000_nodes_written: usize,
    pub status_writes: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        *self != Self::default()
    }
}

pub struct ClusterReconciler {
    store: Arc<dyn ClusterStore>,
    honored_config: Option<String>,
}

impl ClusterReconciler {
    pub fn new(store: Arc<dyn ClusterStore>, honored_config: Option<String>) -> Self {
        Self { store, honored_config }
    }

    /// Runs one full pass. Per-object write failures are reported on the
    /// owning config's status and surface as [`ControllerError::Incomplete`].
    pub async fn reconcile(&self) -> Result<ReconcileReport, ControllerError> {
        let mut report = ReconcileReport::default();
        let nodes = self.store.list_accelerator_nodes().await?;
        let node_names: BTreeSet<String> = nodes.iter().map(ResourceExt::name_any).collect();
        debug!("Reconciling {} accelerator node(s)", node_names.len());

        let mut failures = self.sync_sriov_fec(&nodes, &node_names, &mut report).await?;
        failures += self.sync_n3000(&node_names, &mut report).await?;

        if failures > 0 {
            return Err(ControllerError::Incomplete(failures));
        }
        Ok(report)
    }

    async fn sync_sriov_fec(
        &self,
        nodes: &[Node],
        node_names: &BTreeSet<String>,
        report: &mut ReconcileReport,
    ) -> Result<usize, ControllerError> {
        let configs = self.store.list_cluster_configs().await?;
        let existing: BTreeMap<String, SriovFecNodeConfig> = self
            .store
            .list_node_configs()
            .await?
            .into_iter()
            .map(|c| (c.name_any(), c))
            .collect();

        let mut verdicts: BTreeMap<String, SriovFecClusterConfigStatus> = BTreeMap::new();
        let mut eligible = Vec::new();
        for config in &configs {
            let name = config.name_any();
            match &self.honored_config {
                Some(honored) if &name != honored => {
                    verdicts.insert(
                        name,
                        SriovFecClusterConfigStatus::ignored(format!(
                            "only SriovFecClusterConfig {honored} is honored"
                        )),
                    );
                    continue;
                }
                _ => {}
            }
            if let Err(e) = config.spec.validate() {
                warn!("SriovFecClusterConfig {} is invalid: {}", name, e);
                verdicts.insert(name, SriovFecClusterConfigStatus::failed(e.to_string()));
                continue;
            }
            eligible.push(config);
        }
        eligible.sort_by(|a, b| priority_order(a, b));

        let inventories = existing
            .iter()
            .filter_map(|(name, config)| {
                config
                    .status
                    .as_ref()
                    .map(|status| (name.clone(), status.inventory.clone()))
            })
            .collect();
        let plans = plan_nodes(nodes, &eligible, &inventories);

        let mut node_errors: BTreeMap<&str, String> = BTreeMap::new();
        for (node, plan) in &plans {
            let result = match existing.get(node) {
                None => {
                    info!("Creating SriovFecNodeConfig {}", node);
                    let config = SriovFecNodeConfig::new(node, plan.spec.clone());
                    self.store.create_node_config(&config).await
                }
                Some(current) if current.spec != plan.spec => {
                    info!(
                        "Updating SriovFecNodeConfig {} with {} physical function(s)",
                        node,
                        plan.spec.physical_functions.len()
                    );
                    self.store.update_node_config_spec(node, &plan.spec).await
                }
                Some(_) => continue,
            };
            match result {
                Ok(()) => report.node_configs_written += 1,
                Err(e) => {
                    error!("Failed to sync SriovFecNodeConfig {}: {}", node, e);
                    node_errors.insert(node.as_str(), e.to_string());
                }
            }
        }
        let mut failures = node_errors.len();

        for name in existing.keys().filter(|name| !node_names.contains(*name)) {
            info!("Deleting SriovFecNodeConfig {} of a node without accelerators", name);
            match self.store.delete_node_config(name).await {
                Ok(()) => report.node_configs_deleted += 1,
                Err(e) => {
                    error!("Failed to delete SriovFecNodeConfig {}: {}", name, e);
                    failures += 1;
                }
            }
        }

        for config in &eligible {
            let name = config.name_any();
            let failed: Vec<String> = plans
                .iter()
                .filter(|(node, plan)| plan.winners.contains(&name) && node_errors.contains_key(node.as_str()))
                .map(|(node, _)| format!("{node}: {}", node_errors[node.as_str()]))
                .collect();
            let status = if failed.is_empty() {
                SriovFecClusterConfigStatus::succeeded()
            } else {
                SriovFecClusterConfigStatus::failed(format!(
                    "failed to update SriovFecNodeConfig {}",
                    failed.join("; ")
                ))
            };
            verdicts.insert(name, status);
        }

        for config in &configs {
            let name = config.name_any();
            let Some(status) = verdicts.get(&name) else {
                continue;
            };
            if config.status.as_ref() != Some(status) {
                debug!("SriovFecClusterConfig {} is {:?}", name, status.sync_status);
                match self.store.update_cluster_config_status(&name, status).await {
                    Ok(()) => report.status_writes += 1,
                    Err(e) => {
                        error!("Failed to update status of SriovFecClusterConfig {}: {}", name, e);
                        failures += 1;
                    }
                }
            }
        }
        Ok(failures)
    }

    async fn sync_n3000(
        &self,
        node_names: &BTreeSet<String>,
        report: &mut ReconcileReport,
    ) -> Result<usize, ControllerError> {
        let clusters = self.store.list_n3000_clusters().await?;
        let existing: BTreeMap<String, N3000Node> = self
            .store
            .list_n3000_nodes()
            .await?
            .into_iter()
            .map(|n| (n.name_any(), n))
            .collect();
        let plans = plan_n3000(&clusters, node_names);

        let mut cluster_errors: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (node, plan) in &plans {
            let result = match existing.get(node) {
                None => {
                    info!("Creating N3000Node {} for N3000Cluster {}", node, plan.cluster);
                    self.store
                        .create_n3000_node(&N3000Node::new(node, plan.spec.clone()))
                        .await
                }
                Some(current) if current.spec != plan.spec => {
                    info!("Updating N3000Node {} from N3000Cluster {}", node, plan.cluster);
                    self.store.update_n3000_node_spec(node, &plan.spec).await
                }
                Some(_) => continue,
            };
            match result {
                Ok(()) => report.n3000_nodes_written += 1,
                Err(e) => {
                    error!("Failed to sync N3000Node {}: {}", node, e);
                    cluster_errors
                        .entry(plan.cluster.as_str())
                        .or_default()
                        .push(format!("{node}: {e}"));
                }
            }
        }
        let mut failures: usize = cluster_errors.values().map(Vec::len).sum();

        // Nodes dropped from every N3000Cluster keep their firmware but stop requesting more
        for (name, node) in &existing {
            if plans.contains_key(name) || node.spec.is_empty() {
                continue;
            }
            info!("Clearing N3000Node {} no longer listed by any N3000Cluster", name);
            match self.store.update_n3000_node_spec(name, &N3000NodeSpec::default()).await {
                Ok(()) => report.n3000_nodes_written += 1,
                Err(e) => {
                    error!("Failed to clear N3000Node {}: {}", name, e);
                    failures += 1;
                }
            }
        }

        for cluster in &clusters {
            let name = cluster.name_any();
            let status = match cluster_errors.get(name.as_str()) {
                None => N3000ClusterStatus {
                    sync_status: SyncStatus::Succeeded,
                    last_sync_error: String::new(),
                },
                Some(errors) => N3000ClusterStatus {
                    sync_status: SyncStatus::Failed,
                    last_sync_error: errors.join("; "),
                },
            };
            if cluster.status.as_ref() != Some(&status) {
                match self.store.update_n3000_cluster_status(&name, &status).await {
                    Ok(()) => report.status_writes += 1,
                    Err(e) => {
                        error!("Failed to update status of N3000Cluster {}: {}", name, e);
                        failures += 1;
                    }
                }
            }
        }
        Ok(failures)
    }
}
