//! N3000Node CRD
//!
//! Per-node firmware request rendered from `N3000Cluster`, plus the FPGA and
//! Fortville inventory reported by the node agent.

use crate::condition::Condition;
use crate::n3000_cluster::{FortvilleMac, N3000Fortville, N3000Fpga};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "fpga.intel.com",
    version = "v1",
    kind = "N3000Node",
    namespaced,
    status = "N3000NodeStatus",
    printcolumn = r#"{"name":"Flashed","type":"string","jsonPath":".status.conditions[?(@.type==\"Flashed\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct N3000NodeSpec {
    #[serde(default)]
    pub fpga: Vec<N3000Fpga>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fortville: Option<N3000Fortville>,

    #[serde(default)]
    pub drain_skip: bool,
}

impl N3000NodeSpec {
    /// True when no firmware is requested.
    pub fn is_empty(&self) -> bool {
        self.fpga.is_empty() && self.fortville.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct N3000NodeStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub fpga: Vec<N3000FpgaStatus>,

    #[serde(default)]
    pub fortville: Vec<N3000FortvilleStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct N3000FpgaStatus {
    #[serde(rename = "PCIAddr")]
    pub pci_addr: String,

    #[serde(default)]
    pub device_id: String,

    #[serde(default)]
    pub bitstream_id: String,

    #[serde(default)]
    pub bitstream_version: String,

    /// FPGA core temperature as reported by the BMC
    #[serde(default)]
    pub temperature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct N3000FortvilleStatus {
    #[serde(default, rename = "N3000PCI")]
    pub n3000_pci: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub device_id: String,

    #[serde(default)]
    pub modules: Vec<FortvilleModule>,

    #[serde(default, rename = "MACs")]
    pub macs: Vec<FortvilleMac>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct FortvilleModule {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub version: String,
}
