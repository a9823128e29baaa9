//! SriovFecClusterConfig CRD
//!
//! Cluster-wide desired state for SR-IOV FEC accelerators. The cluster
//! reconciler renders these into one `SriovFecNodeConfig` per node.

use crate::bbdev::BBDevConfig;
use crate::sriov_fec_node_config::SriovAccelerator;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "sriovfec.intel.com",
    version = "v2",
    kind = "SriovFecClusterConfig",
    namespaced,
    status = "SriovFecClusterConfigStatus",
    shortname = "sfcc",
    printcolumn = r#"{"name":"SyncStatus","type":"string","jsonPath":".status.syncStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecClusterConfigSpec {
    /// Node labels that must all be present; empty matches every accelerator node
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Filters accelerators on a matched node; empty fields match anything
    #[serde(default)]
    pub accelerator_selector: AcceleratorSelector,

    /// Higher priority wins when several configs match the same accelerator
    #[serde(default)]
    pub priority: i32,

    pub physical_function: PhysicalFunctionConfig,

    /// Skip cordon and drain while applying this configuration
    #[serde(default)]
    pub drain_skip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorSelector {
    #[serde(default, rename = "vendorID")]
    pub vendor_id: String,

    #[serde(default, rename = "deviceID")]
    pub device_id: String,

    #[serde(default)]
    pub pci_address: String,

    #[serde(default)]
    pub pf_driver: String,

    #[serde(default)]
    pub max_virtual_functions: u32,
}

impl AcceleratorSelector {
    /// Returns true if every non-empty field equals the accelerator's value.
    pub fn matches(&self, acc: &SriovAccelerator) -> bool {
        fn field(want: &str, have: &str) -> bool {
            want.is_empty() || want.eq_ignore_ascii_case(have)
        }
        field(&self.vendor_id, &acc.vendor_id)
            && field(&self.device_id, &acc.device_id)
            && field(&self.pci_address, &acc.pci_address)
            && field(&self.pf_driver, &acc.pf_driver)
            && (self.max_virtual_functions == 0
                || self.max_virtual_functions == acc.max_virtual_functions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalFunctionConfig {
    /// Kernel driver the PF is bound to (pci-pf-stub, igb_uio)
    pub pf_driver: String,

    /// Driver every VF is bound to (vfio-pci, igb_uio)
    pub vf_driver: String,

    /// Number of VFs to create
    #[serde(default)]
    pub vf_amount: u32,

    #[serde(default)]
    pub bb_dev_config: BBDevConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    InProgress,
    Succeeded,
    Failed,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecClusterConfigStatus {
    #[serde(default)]
    pub sync_status: SyncStatus,

    #[serde(default)]
    pub last_sync_error: String,
}

impl SriovFecClusterConfigStatus {
    pub fn succeeded() -> Self {
        Self {
            sync_status: SyncStatus::Succeeded,
            last_sync_error: String::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            sync_status: SyncStatus::Failed,
            last_sync_error: reason.into(),
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            sync_status: SyncStatus::Ignored,
            last_sync_error: reason.into(),
        }
    }
}
