//! N3000Cluster CRD
//!
//! Lists the nodes whose N3000 cards should be flashed, with the FPGA user
//! images and Fortville NIC firmware to use on each.

use crate::sriov_fec_cluster_config::SyncStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "fpga.intel.com",
    version = "v1",
    kind = "N3000Cluster",
    namespaced,
    status = "N3000ClusterStatus",
    printcolumn = r#"{"name":"SyncStatus","type":"string","jsonPath":".status.syncStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct N3000ClusterSpec {
    #[serde(default)]
    pub nodes: Vec<N3000ClusterNode>,

    #[serde(default)]
    pub drain_skip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct N3000ClusterNode {
    pub node_name: String,

    #[serde(default)]
    pub fpga: Vec<N3000Fpga>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fortville: Option<N3000Fortville>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct N3000Fpga {
    #[serde(rename = "userImageURL")]
    pub user_image_url: String,

    #[serde(rename = "PCIAddr")]
    pub pci_addr: String,

    /// MD5 of the image, hex encoded; empty skips verification
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct N3000Fortville {
    #[serde(rename = "firmwareURL")]
    pub firmware_url: String,

    #[serde(default)]
    pub checksum: String,

    #[serde(default, rename = "MACs")]
    pub macs: Vec<FortvilleMac>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct FortvilleMac {
    #[serde(rename = "MAC")]
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct N3000ClusterStatus {
    #[serde(default)]
    pub sync_status: SyncStatus,

    #[serde(default)]
    pub last_sync_error: String,
}
