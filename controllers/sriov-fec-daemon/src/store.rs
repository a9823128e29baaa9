//! Access to this node's `SriovFecNodeConfig` and device plugin pods.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{SriovFecNodeConfig, SriovFecNodeConfigStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::info;

/// Label selecting the SR-IOV network device plugin pods.
pub const DEVICE_PLUGIN_SELECTOR: &str = "app=sriov-device-plugin";

#[async_trait]
pub trait NodeConfigStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<SriovFecNodeConfig>, ControllerError>;

    /// Creates the object, then writes its status.
    async fn create(&self, config: &SriovFecNodeConfig) -> Result<(), ControllerError>;

    async fn update_status(
        &self,
        name: &str,
        status: &SriovFecNodeConfigStatus,
    ) -> Result<(), ControllerError>;

    /// Deletes the device plugin pods on `node` so they re-advertise the VFs.
    async fn restart_device_plugin(&self, node: &str) -> Result<(), ControllerError>;
}

#[derive(Clone)]
pub struct KubeNodeConfigStore {
    configs: Api<SriovFecNodeConfig>,
    pods: Api<Pod>,
}

impl KubeNodeConfigStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            configs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl NodeConfigStore for KubeNodeConfigStore {
    async fn get(&self, name: &str) -> Result<Option<SriovFecNodeConfig>, ControllerError> {
        Ok(self.configs.get_opt(name).await?)
    }

    async fn create(&self, config: &SriovFecNodeConfig) -> Result<(), ControllerError> {
        let created = self.configs.create(&PostParams::default(), config).await?;
        if let Some(status) = &config.status {
            self.update_status(&created.name_any(), status).await?;
        }
        Ok(())
    }

    async fn update_status(
        &self,
        name: &str,
        status: &SriovFecNodeConfigStatus,
    ) -> Result<(), ControllerError> {
        self.configs
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;
        Ok(())
    }

    async fn restart_device_plugin(&self, node: &str) -> Result<(), ControllerError> {
        let pods = self
            .pods
            .list(
                &ListParams::default()
                    .labels(DEVICE_PLUGIN_SELECTOR)
                    .fields(&format!("spec.nodeName={node}")),
            )
            .await?;
        for pod in pods.items {
            let name = pod.name_any();
            info!("Restarting device plugin pod {}", name);
            self.pods.delete(&name, &DeleteParams::default()).await?;
        }
        Ok(())
    }
}
