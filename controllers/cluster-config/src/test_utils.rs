//! Builders for test objects and an in-memory `ClusterStore`.

use crate::error::ControllerError;
use crate::store::ClusterStore;
use async_trait::async_trait;
use crds::*;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const NAMESPACE: &str = "vran";
pub const ACC100_PCI: &str = "0000:af:00.0";
pub const ACC100_DEVICE: &str = "0d5c";
pub const N3000_PCI: &str = "0000:1d:00.0";
pub const N3000_DEVICE: &str = "0d8f";

fn time(rfc3339: &str) -> Time {
    serde_json::from_value(serde_json::Value::String(rfc3339.to_string())).unwrap()
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

pub fn accelerator_node(name: &str, labels: &[(&str, &str)]) -> Node {
    let mut labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.insert(ACCELERATOR_PRESENT_LABEL.to_string(), "true".to_string());
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn inventory(accelerators: &[(&str, &str)]) -> NodeInventory {
    NodeInventory {
        sriov_accelerators: accelerators
            .iter()
            .map(|(pci, device)| SriovAccelerator {
                vendor_id: "8086".to_string(),
                device_id: device.to_string(),
                pci_address: pci.to_string(),
                pf_driver: String::new(),
                max_virtual_functions: 16,
                virtual_functions: vec![],
            })
            .collect(),
    }
}

/// Matches every accelerator on every node.
pub fn cluster_config(name: &str, priority: i32, created: &str) -> SriovFecClusterConfig {
    let mut config = SriovFecClusterConfig::new(
        name,
        SriovFecClusterConfigSpec {
            node_selector: BTreeMap::new(),
            accelerator_selector: AcceleratorSelector::default(),
            priority,
            physical_function: PhysicalFunctionConfig {
                pf_driver: "pci-pf-stub".to_string(),
                vf_driver: "vfio-pci".to_string(),
                vf_amount: 2,
                bb_dev_config: BBDevConfig::default(),
            },
            drain_skip: false,
        },
    );
    config.metadata = meta(name);
    config.metadata.creation_timestamp = Some(time(created));
    config
}

pub fn node_config(name: &str, inventory: NodeInventory) -> SriovFecNodeConfig {
    let mut config = SriovFecNodeConfig::new(name, SriovFecNodeConfigSpec::default());
    config.metadata = meta(name);
    config.status = Some(SriovFecNodeConfigStatus {
        conditions: vec![],
        inventory,
    });
    config
}

pub fn n3000_cluster(name: &str, nodes: &[&str]) -> N3000Cluster {
    let mut cluster = N3000Cluster::new(
        name,
        N3000ClusterSpec {
            nodes: nodes
                .iter()
                .map(|node| N3000ClusterNode {
                    node_name: node.to_string(),
                    fpga: vec![N3000Fpga {
                        user_image_url: format!("http://images.local/{name}.bin"),
                        pci_addr: N3000_PCI.to_string(),
                        checksum: String::new(),
                    }],
                    fortville: None,
                })
                .collect(),
            drain_skip: false,
        },
    );
    cluster.metadata = meta(name);
    cluster
}

#[derive(Default)]
pub struct ClusterState {
    pub nodes: Vec<Node>,
    pub cluster_configs: Vec<SriovFecClusterConfig>,
    pub node_configs: BTreeMap<String, SriovFecNodeConfig>,
    pub n3000_clusters: Vec<N3000Cluster>,
    pub n3000_nodes: BTreeMap<String, N3000Node>,
    /// Every mutating call, as `verb kind/name`
    pub writes: Vec<String>,
    /// Node configs whose spec updates are rejected
    pub failing_node_configs: Vec<String>,
    /// Cluster configs whose status updates are rejected
    pub failing_cluster_statuses: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeClusterStore(Arc<Mutex<ClusterState>>);

impl FakeClusterStore {
    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take_writes(&self) -> Vec<String> {
        std::mem::take(&mut self.state().writes)
    }

    pub fn cluster_config_status(&self, name: &str) -> Option<SriovFecClusterConfigStatus> {
        self.state()
            .cluster_configs
            .iter()
            .find(|c| c.name_any() == name)
            .and_then(|c| c.status.clone())
    }
}

fn rejected(what: String) -> ControllerError {
    ControllerError::InvalidConfig(format!("rejected write to {what}"))
}

#[async_trait]
impl ClusterStore for FakeClusterStore {
    async fn list_accelerator_nodes(&self) -> Result<Vec<Node>, ControllerError> {
        Ok(self
            .state()
            .nodes
            .iter()
            .filter(|n| n.labels().contains_key(ACCELERATOR_PRESENT_LABEL))
            .cloned()
            .collect())
    }

    async fn list_cluster_configs(&self) -> Result<Vec<SriovFecClusterConfig>, ControllerError> {
        Ok(self.state().cluster_configs.clone())
    }

    async fn list_node_configs(&self) -> Result<Vec<SriovFecNodeConfig>, ControllerError> {
        Ok(self.state().node_configs.values().cloned().collect())
    }

    async fn create_node_config(&self, config: &SriovFecNodeConfig) -> Result<(), ControllerError> {
        let mut state = self.state();
        let name = config.name_any();
        state.writes.push(format!("create SriovFecNodeConfig/{name}"));
        state.node_configs.insert(name, config.clone());
        Ok(())
    }

    async fn update_node_config_spec(
        &self,
        name: &str,
        spec: &SriovFecNodeConfigSpec,
    ) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.failing_node_configs.iter().any(|n| n == name) {
            return Err(rejected(format!("SriovFecNodeConfig/{name}")));
        }
        state.writes.push(format!("update SriovFecNodeConfig/{name}"));
        if let Some(config) = state.node_configs.get_mut(name) {
            config.spec = spec.clone();
        }
        Ok(())
    }

    async fn delete_node_config(&self, name: &str) -> Result<(), ControllerError> {
        let mut state = self.state();
        state.writes.push(format!("delete SriovFecNodeConfig/{name}"));
        state.node_configs.remove(name);
        Ok(())
    }

    async fn update_cluster_config_status(
        &self,
        name: &str,
        status: &SriovFecClusterConfigStatus,
    ) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.failing_cluster_statuses.iter().any(|n| n == name) {
            return Err(rejected(format!("SriovFecClusterConfig/{name}/status")));
        }
        state.writes.push(format!("status SriovFecClusterConfig/{name}"));
        if let Some(config) = state.cluster_configs.iter_mut().find(|c| c.name_any() == name) {
            config.status = Some(status.clone());
        }
        Ok(())
    }

    async fn list_n3000_clusters(&self) -> Result<Vec<N3000Cluster>, ControllerError> {
        Ok(self.state().n3000_clusters.clone())
    }

    async fn list_n3000_nodes(&self) -> Result<Vec<N3000Node>, ControllerError> {
        Ok(self.state().n3000_nodes.values().cloned().collect())
    }

    async fn create_n3000_node(&self, node: &N3000Node) -> Result<(), ControllerError> {
        let mut state = self.state();
        let name = node.name_any();
        state.writes.push(format!("create N3000Node/{name}"));
        state.n3000_nodes.insert(name, node.clone());
        Ok(())
    }

    async fn update_n3000_node_spec(&self, name: &str, spec: &N3000NodeSpec) -> Result<(), ControllerError> {
        let mut state = self.state();
        state.writes.push(format!("update N3000Node/{name}"));
        if let Some(node) = state.n3000_nodes.get_mut(name) {
            node.spec = spec.clone();
        }
        Ok(())
    }

    async fn update_n3000_cluster_status(
        &self,
        name: &str,
        status: &N3000ClusterStatus,
    ) -> Result<(), ControllerError> {
        let mut state = self.state();
        state.writes.push(format!("status N3000Cluster/{name}"));
        if let Some(cluster) = state.n3000_clusters.iter_mut().find(|c| c.name_any() == name) {
            cluster.status = Some(status.clone());
        }
        Ok(())
    }
}
