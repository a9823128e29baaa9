//! Cluster API access used by the reconciler.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{
    ACCELERATOR_PRESENT_LABEL, N3000Cluster, N3000ClusterStatus, N3000Node, N3000NodeSpec,
    SriovFecClusterConfig, SriovFecClusterConfigStatus, SriovFecNodeConfig, SriovFecNodeConfigSpec,
};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Nodes carrying the accelerator label.
    async fn list_accelerator_nodes(&self) -> Result<Vec<Node>, ControllerError>;

    async fn list_cluster_configs(&self) -> Result<Vec<SriovFecClusterConfig>, ControllerError>;

    async fn list_node_configs(&self) -> Result<Vec<SriovFecNodeConfig>, ControllerError>;

    async fn create_node_config(&self, config: &SriovFecNodeConfig) -> Result<(), ControllerError>;

    async fn update_node_config_spec(
        &self,
        name: &str,
        spec: &SriovFecNodeConfigSpec,
    ) -> Result<(), ControllerError>;

    async fn delete_node_config(&self, name: &str) -> Result<(), ControllerError>;

    async fn update_cluster_config_status(
        &self,
        name: &str,
        status: &SriovFecClusterConfigStatus,
    ) -> Result<(), ControllerError>;

    async fn list_n3000_clusters(&self) -> Result<Vec<N3000Cluster>, ControllerError>;

    async fn list_n3000_nodes(&self) -> Result<Vec<N3000Node>, ControllerError>;

    async fn create_n3000_node(&self, node: &N3000Node) -> Result<(), ControllerError>;

    async fn update_n3000_node_spec(&self, name: &str, spec: &N3000NodeSpec) -> Result<(), ControllerError>;

    async fn update_n3000_cluster_status(
        &self,
        name: &str,
        status: &N3000ClusterStatus,
    ) -> Result<(), ControllerError>;
}

/// `ClusterStore` backed by the Kubernetes API, one namespace for all CRDs.
#[derive(Clone)]
pub struct KubeClusterStore {
    nodes: Api<Node>,
    cluster_configs: Api<SriovFecClusterConfig>,
    node_configs: Api<SriovFecNodeConfig>,
    n3000_clusters: Api<N3000Cluster>,
    n3000_nodes: Api<N3000Node>,
}

impl KubeClusterStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            cluster_configs: Api::namespaced(client.clone(), namespace),
            node_configs: Api::namespaced(client.clone(), namespace),
            n3000_clusters: Api::namespaced(client.clone(), namespace),
            n3000_nodes: Api::namespaced(client, namespace),
        }
    }
}

fn spec_patch<T: serde::Serialize>(spec: &T) -> Patch<serde_json::Value> {
    Patch::Merge(json!({ "spec": spec }))
}

fn status_patch<T: serde::Serialize>(status: &T) -> Patch<serde_json::Value> {
    Patch::Merge(json!({ "status": status }))
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn list_accelerator_nodes(&self) -> Result<Vec<Node>, ControllerError> {
        let nodes = self
            .nodes
            .list(&ListParams::default().labels(ACCELERATOR_PRESENT_LABEL))
            .await?;
        Ok(nodes.items)
    }

    async fn list_cluster_configs(&self) -> Result<Vec<SriovFecClusterConfig>, ControllerError> {
        Ok(self.cluster_configs.list(&ListParams::default()).await?.items)
    }

    async fn list_node_configs(&self) -> Result<Vec<SriovFecNodeConfig>, ControllerError> {
        Ok(self.node_configs.list(&ListParams::default()).await?.items)
    }

    async fn create_node_config(&self, config: &SriovFecNodeConfig) -> Result<(), ControllerError> {
        self.node_configs.create(&PostParams::default(), config).await?;
        Ok(())
    }

    async fn update_node_config_spec(
        &self,
        name: &str,
        spec: &SriovFecNodeConfigSpec,
    ) -> Result<(), ControllerError> {
        self.node_configs
            .patch(name, &PatchParams::default(), &spec_patch(spec))
            .await?;
        Ok(())
    }

    async fn delete_node_config(&self, name: &str) -> Result<(), ControllerError> {
        self.node_configs.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn update_cluster_config_status(
        &self,
        name: &str,
        status: &SriovFecClusterConfigStatus,
    ) -> Result<(), ControllerError> {
        self.cluster_configs
            .patch_status(name, &PatchParams::default(), &status_patch(status))
            .await?;
        Ok(())
    }

    async fn list_n3000_clusters(&self) -> Result<Vec<N3000Cluster>, ControllerError> {
        Ok(self.n3000_clusters.list(&ListParams::default()).await?.items)
    }

    async fn list_n3000_nodes(&self) -> Result<Vec<N3000Node>, ControllerError> {
        Ok(self.n3000_nodes.list(&ListParams::default()).await?.items)
    }

    async fn create_n3000_node(&self, node: &N3000Node) -> Result<(), ControllerError> {
        self.n3000_nodes.create(&PostParams::default(), node).await?;
        Ok(())
    }

    async fn update_n3000_node_spec(&self, name: &str, spec: &N3000NodeSpec) -> Result<(), ControllerError> {
        // explicit null so a dropped fortville request is removed by the merge
        let patch = Patch::Merge(json!({
            "spec": {
                "fpga": spec.fpga,
                "fortville": spec.fortville,
                "drainSkip": spec.drain_skip,
            }
        }));
        self.n3000_nodes.patch(name, &PatchParams::default(), &patch).await?;
        Ok(())
    }

    async fn update_n3000_cluster_status(
        &self,
        name: &str,
        status: &N3000ClusterStatus,
    ) -> Result<(), ControllerError> {
        self.n3000_clusters
            .patch_status(name, &PatchParams::default(), &status_patch(status))
            .await?;
        Ok(())
    }
}
