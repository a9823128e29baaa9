//! Rendering of cluster-wide requests into per-node specs.
//!
//! Pure functions over listed objects; the reconciler does all I/O.

use crds::{
    N3000Cluster, N3000NodeSpec, NodeInventory, PhysicalFunctionConfigExt, SriovFecClusterConfig,
    SriovFecNodeConfigSpec,
};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

/// True when every selector label is present on the node with the same value.
pub fn node_selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(key, value)| labels.get(key) == Some(value))
}

/// Higher priority first, then the newer config, then by name.
pub fn priority_order(a: &SriovFecClusterConfig, b: &SriovFecClusterConfig) -> Ordering {
    b.spec
        .priority
        .cmp(&a.spec.priority)
        .then_with(|| b.metadata.creation_timestamp.cmp(&a.metadata.creation_timestamp))
        .then_with(|| a.name_any().cmp(&b.name_any()))
}

/// Desired spec of one node and the configs that contributed to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePlan {
    pub spec: SriovFecNodeConfigSpec,
    pub winners: BTreeSet<String>,
}

/// Assigns every discovered accelerator to the first matching config.
///
/// `configs` must be sorted with [`priority_order`]. Nodes without a reported
/// inventory get an empty plan.
pub fn plan_nodes(
    nodes: &[Node],
    configs: &[&SriovFecClusterConfig],
    inventories: &BTreeMap<String, NodeInventory>,
) -> BTreeMap<String, NodePlan> {
    let mut plans = BTreeMap::new();
    for node in nodes {
        let name = node.name_any();
        let mut plan = NodePlan::default();

        if let Some(inventory) = inventories.get(&name) {
            let mut claimed: HashSet<String> = HashSet::new();
            for config in configs {
                if !node_selector_matches(&config.spec.node_selector, node.labels()) {
                    continue;
                }
                for acc in &inventory.sriov_accelerators {
                    if claimed.contains(&acc.pci_address) || !config.spec.accelerator_selector.matches(acc) {
                        continue;
                    }
                    claimed.insert(acc.pci_address.clone());
                    let pf = &config.spec.physical_function;
                    plan.spec.physical_functions.push(PhysicalFunctionConfigExt {
                        pci_address: acc.pci_address.clone(),
                        pf_driver: pf.pf_driver.clone(),
                        vf_driver: pf.vf_driver.clone(),
                        vf_amount: pf.vf_amount,
                        bb_dev_config: pf.bb_dev_config.clone(),
                    });
                    plan.spec.drain_skip |= config.spec.drain_skip;
                    plan.winners.insert(config.name_any());
                }
            }
        }

        // stable across priority changes that keep the same winners
        plan.spec
            .physical_functions
            .sort_by(|a, b| a.pci_address.cmp(&b.pci_address));
        plans.insert(name, plan);
    }
    plans
}

/// Desired `N3000Node` spec of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct N3000Plan {
    pub cluster: String,
    pub spec: N3000NodeSpec,
}

/// Renders `N3000Cluster`s into per-node specs. The first cluster by name
/// listing a node wins; nodes without the accelerator label are skipped.
pub fn plan_n3000(clusters: &[N3000Cluster], accelerator_nodes: &BTreeSet<String>) -> BTreeMap<String, N3000Plan> {
    let mut ordered: Vec<&N3000Cluster> = clusters.iter().collect();
    ordered.sort_by_key(|c| c.name_any());

    let mut plans: BTreeMap<String, N3000Plan> = BTreeMap::new();
    for cluster in ordered {
        let cluster_name = cluster.name_any();
        for entry in &cluster.spec.nodes {
            if !accelerator_nodes.contains(&entry.node_name) {
                warn!(
                    "N3000Cluster {} lists {} which has no accelerator label",
                    cluster_name, entry.node_name
                );
                continue;
            }
            if let Some(existing) = plans.get(&entry.node_name) {
                warn!(
                    "Node {} is already targeted by N3000Cluster {}, ignoring {}",
                    entry.node_name, existing.cluster, cluster_name
                );
                continue;
            }
            plans.insert(
                entry.node_name.clone(),
                N3000Plan {
                    cluster: cluster_name.clone(),
                    spec: N3000NodeSpec {
                        fpga: entry.fpga.clone(),
                        fortville: entry.fortville.clone(),
                        drain_skip: cluster.spec.drain_skip,
                    },
                },
            );
        }
    }
    plans
}
