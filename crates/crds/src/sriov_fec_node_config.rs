//! SriovFecNodeConfig CRD
//!
//! Per-node desired state (written by the cluster reconciler) and observed
//! state (written by the node agent). One object per accelerator node, named
//! after the node.

use crate::bbdev::BBDevConfig;
use crate::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "sriovfec.intel.com",
    version = "v2",
    kind = "SriovFecNodeConfig",
    namespaced,
    status = "SriovFecNodeConfigStatus",
    shortname = "sfnc",
    printcolumn = r#"{"name":"Configured","type":"string","jsonPath":".status.conditions[?(@.type==\"Configured\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecNodeConfigSpec {
    #[serde(default)]
    pub physical_functions: Vec<PhysicalFunctionConfigExt>,

    #[serde(default)]
    pub drain_skip: bool,
}

/// Physical function configuration bound to a concrete PCI address.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalFunctionConfigExt {
    pub pci_address: String,

    pub pf_driver: String,

    pub vf_driver: String,

    #[serde(default)]
    pub vf_amount: u32,

    #[serde(default)]
    pub bb_dev_config: BBDevConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecNodeConfigStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub inventory: NodeInventory,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInventory {
    #[serde(default)]
    pub sriov_accelerators: Vec<SriovAccelerator>,
}

impl NodeInventory {
    pub fn accelerator(&self, pci_address: &str) -> Option<&SriovAccelerator> {
        self.sriov_accelerators
            .iter()
            .find(|a| a.pci_address == pci_address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SriovAccelerator {
    #[serde(rename = "vendorID")]
    pub vendor_id: String,

    #[serde(rename = "deviceID")]
    pub device_id: String,

    pub pci_address: String,

    /// Driver the PF is currently bound to; empty when unbound
    #[serde(default)]
    pub pf_driver: String,

    #[serde(default)]
    pub max_virtual_functions: u32,

    #[serde(default)]
    pub virtual_functions: Vec<VirtualFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFunction {
    pub pci_address: String,

    #[serde(default)]
    pub driver: String,

    #[serde(default, rename = "deviceID")]
    pub device_id: String,
}

/// Driver names compare equal regardless of `-`/`_` spelling.
pub fn same_driver(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x == y || (matches!(x, b'-' | b'_') && matches!(y, b'-' | b'_')))
}

impl SriovFecNodeConfigSpec {
    /// Returns true if the observed inventory already reflects this spec.
    ///
    /// Listed PFs must be bound to `pfDriver` with exactly `vfAmount` VFs, all
    /// bound to `vfDriver`. Accelerators not listed must have no VFs.
    pub fn is_satisfied_by(&self, inventory: &NodeInventory) -> bool {
        let listed_ok = self.physical_functions.iter().all(|pf| {
            inventory.accelerator(&pf.pci_address).is_some_and(|acc| {
                same_driver(&acc.pf_driver, &pf.pf_driver)
                    && acc.virtual_functions.len() == pf.vf_amount as usize
                    && acc
                        .virtual_functions
                        .iter()
                        .all(|vf| same_driver(&vf.driver, &pf.vf_driver))
            })
        });
        let unlisted_ok = inventory
            .sriov_accelerators
            .iter()
            .filter(|acc| {
                !self
                    .physical_functions
                    .iter()
                    .any(|pf| pf.pci_address == acc.pci_address)
            })
            .all(|acc| acc.virtual_functions.is_empty());
        listed_ok && unlisted_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(pf_driver: &str, vfs: &[(&str, &str)]) -> NodeInventory {
        NodeInventory {
            sriov_accelerators: vec![SriovAccelerator {
                vendor_id: "8086".to_string(),
                device_id: "0d8f".to_string(),
                pci_address: "0000:14:00.1".to_string(),
                pf_driver: pf_driver.to_string(),
                max_virtual_functions: 8,
                virtual_functions: vfs
                    .iter()
                    .map(|(addr, drv)| VirtualFunction {
                        pci_address: addr.to_string(),
                        driver: drv.to_string(),
                        device_id: "0d90".to_string(),
                    })
                    .collect(),
            }],
        }
    }

    fn spec(vf_amount: u32) -> SriovFecNodeConfigSpec {
        SriovFecNodeConfigSpec {
            physical_functions: vec![PhysicalFunctionConfigExt {
                pci_address: "0000:14:00.1".to_string(),
                pf_driver: "pci-pf-stub".to_string(),
                vf_driver: "vfio-pci".to_string(),
                vf_amount,
                bb_dev_config: BBDevConfig::default(),
            }],
            drain_skip: false,
        }
    }

    #[test]
    fn test_same_driver_ignores_separator_style() {
        assert!(same_driver("pci-pf-stub", "pci_pf_stub"));
        assert!(!same_driver("pci-pf-stub", "igb_uio"));
        assert!(!same_driver("vfio-pci", "vfio-pcie"));
    }

    #[test]
    fn test_is_satisfied_by_matching_inventory() {
        let inv = inventory(
            "pci_pf_stub",
            &[("0000:15:00.0", "vfio-pci"), ("0000:15:00.1", "vfio-pci")],
        );
        assert!(spec(2).is_satisfied_by(&inv));
        assert!(!spec(4).is_satisfied_by(&inv));
    }

    #[test]
    fn test_is_satisfied_by_rejects_wrong_vf_driver() {
        let inv = inventory("pci-pf-stub", &[("0000:15:00.0", "igb_uio")]);
        assert!(!spec(1).is_satisfied_by(&inv));
    }

    #[test]
    fn test_empty_spec_requires_zero_vfs() {
        let empty = SriovFecNodeConfigSpec::default();
        assert!(empty.is_satisfied_by(&inventory("pci-pf-stub", &[])));
        assert!(!empty.is_satisfied_by(&inventory("pci-pf-stub", &[("0000:15:00.0", "vfio-pci")])));
    }

    #[test]
    fn test_missing_pf_is_not_satisfied() {
        assert!(!spec(0).is_satisfied_by(&NodeInventory::default()));
    }
}
