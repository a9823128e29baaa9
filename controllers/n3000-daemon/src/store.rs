//! Access to this node's `N3000Node`.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{N3000Node, N3000NodeStatus};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

#[async_trait]
pub trait N3000NodeStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<N3000Node>, ControllerError>;

    /// Creates the object, then writes its status.
    async fn create(&self, node: &N3000Node) -> Result<(), ControllerError>;

    async fn update_status(&self, name: &str, status: &N3000NodeStatus) -> Result<(), ControllerError>;
}

#[derive(Clone)]
pub struct KubeN3000NodeStore {
    api: Api<N3000Node>,
}

impl KubeN3000NodeStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl N3000NodeStore for KubeN3000NodeStore {
    async fn get(&self, name: &str) -> Result<Option<N3000Node>, ControllerError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, node: &N3000Node) -> Result<(), ControllerError> {
        let created = self.api.create(&PostParams::default(), node).await?;
        if let Some(status) = &node.status {
            self.update_status(&created.name_any(), status).await?;
        }
        Ok(())
    }

    async fn update_status(&self, name: &str, status: &N3000NodeStatus) -> Result<(), ControllerError> {
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
            .await?;
        Ok(())
    }
}
