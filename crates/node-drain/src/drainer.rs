//! Cordon, drain and uncordon of a single node

use crate::error::DrainError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Annotation carried by static (mirror) pods.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait NodeDrainer: Send + Sync {
    /// Marks the node unschedulable.
    async fn cordon(&self, node: &str) -> Result<(), DrainError>;

    /// Evicts the node's workload and waits up to `timeout` for it to go.
    async fn drain(&self, node: &str, timeout: Duration) -> Result<(), DrainError>;

    async fn uncordon(&self, node: &str) -> Result<(), DrainError>;
}

fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.owner_references().iter().any(|o| o.kind == "DaemonSet")
}

fn is_mirror_pod(pod: &Pod) -> bool {
    pod.annotations().contains_key(MIRROR_POD_ANNOTATION)
}

/// Pods a drain must evict: everything but DaemonSet-owned and mirror pods.
///
/// Unmanaged pods and pods with emptyDir volumes are included.
pub fn pods_to_evict(pods: &[Pod]) -> Vec<&Pod> {
    pods.iter()
        .filter(|p| !is_daemonset_pod(p) && !is_mirror_pod(p))
        .collect()
}

fn pod_key(pod: &Pod) -> (String, String) {
    (pod.namespace().unwrap_or_default(), pod.name_any())
}

#[derive(Clone)]
pub struct KubeNodeDrainer {
    client: Client,
}

impl KubeNodeDrainer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<(), DrainError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .patch(
                node,
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": { "unschedulable": unschedulable } })),
            )
            .await?;
        Ok(())
    }

    async fn pods_on(&self, node: &str) -> Result<Vec<Pod>, DrainError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={node}")))
            .await?;
        Ok(list.items)
    }
}

#[async_trait]
impl NodeDrainer for KubeNodeDrainer {
    async fn cordon(&self, node: &str) -> Result<(), DrainError> {
        info!("Cordoning node {}", node);
        self.set_unschedulable(node, true).await
    }

    async fn drain(&self, node: &str, timeout: Duration) -> Result<(), DrainError> {
        let pods = self.pods_on(node).await?;
        let targets: BTreeSet<(String, String)> =
            pods_to_evict(&pods).into_iter().map(pod_key).collect();
        info!("Draining node {}: evicting {} pods", node, targets.len());

        let mut refused = Vec::new();
        for (namespace, name) in &targets {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            if let Err(e) = api.evict(name, &EvictParams::default()).await {
                warn!("Eviction of {}/{} refused: {}", namespace, name, e);
                refused.push(format!("{namespace}/{name}"));
            }
        }
        if !refused.is_empty() {
            return Err(DrainError::DrainFailed {
                node: node.to_string(),
                reason: format!("eviction refused for {}", refused.join(", ")),
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining: Vec<(String, String)> = self
                .pods_on(node)
                .await?
                .iter()
                .map(pod_key)
                .filter(|key| targets.contains(key))
                .collect();
            if remaining.is_empty() {
                info!("Node {} drained", node);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DrainError::DrainFailed {
                    node: node.to_string(),
                    reason: format!(
                        "{} pods still terminating after {}s",
                        remaining.len(),
                        timeout.as_secs()
                    ),
                });
            }
            debug!("Waiting for {} pods to terminate on {}", remaining.len(), node);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn uncordon(&self, node: &str) -> Result<(), DrainError> {
        info!("Uncordoning node {}", node);
        self.set_unschedulable(node, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str, extra: serde_json::Value) -> Pod {
        let mut value = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": "default" },
            "spec": { "containers": [], "nodeName": "node-1" }
        });
        if let Some(meta) = extra.as_object() {
            for (k, v) in meta {
                value["metadata"][k] = v.clone();
            }
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_pods_to_evict_skips_daemonsets_and_mirrors() {
        let pods = vec![
            pod(
                "web-1",
                json!({ "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "web", "uid": "1"
                }]}),
            ),
            pod(
                "device-plugin-x",
                json!({ "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "DaemonSet", "name": "device-plugin", "uid": "2"
                }]}),
            ),
            pod(
                "kube-apiserver-node-1",
                json!({ "annotations": { "kubernetes.io/config.mirror": "abc" } }),
            ),
            pod("bare", json!({})),
        ];

        let names: Vec<String> = pods_to_evict(&pods).iter().map(|p| p.name_any()).collect();
        assert_eq!(names, vec!["web-1", "bare"]);
    }
}
