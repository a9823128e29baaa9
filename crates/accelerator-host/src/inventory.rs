//! Accelerator inventory probe
//!
//! Walks the PCI bus, keeps whitelisted SR-IOV physical functions and reports
//! their current driver, VF capacity and VFs.

use crate::error::HostError;
use crate::sysfs::PciBus;
use crate::whitelist::AcceleratorDiscoveryConfig;
use crds::{NodeInventory, SriovAccelerator, VirtualFunction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Strips the `0x` prefix sysfs puts on ids.
fn pci_id(raw: &str) -> String {
    raw.trim().trim_start_matches("0x").to_ascii_lowercase()
}

/// Discovers accelerators for one node.
#[derive(Clone)]
pub struct InventoryProbe {
    bus: Arc<dyn PciBus>,
    whitelist: Arc<AcceleratorDiscoveryConfig>,
}

impl InventoryProbe {
    pub fn new(bus: Arc<dyn PciBus>, whitelist: Arc<AcceleratorDiscoveryConfig>) -> Self {
        Self { bus, whitelist }
    }

    pub fn whitelist(&self) -> &AcceleratorDiscoveryConfig {
        &self.whitelist
    }

    /// Returns the inventory sorted by PCI address.
    ///
    /// Only failure to list the bus is an error; unreadable attributes of a
    /// single device degrade to empty values.
    pub fn discover(&self) -> Result<NodeInventory, HostError> {
        let mut accelerators = Vec::new();
        for address in self.bus.devices()? {
            let read = |attr: &str| self.bus.read_attribute(&address, attr).unwrap_or_default();
            let class = read("class");
            let vendor = read("vendor");
            let device = read("device");
            if !self.whitelist.matches(&class, &vendor, &device) {
                continue;
            }
            if !self.bus.has_attribute(&address, "sriov_totalvfs") {
                debug!("Skipping {}: not an SR-IOV physical function", address);
                continue;
            }
            accelerators.push(self.describe(&address, &vendor, &device));
        }
        accelerators.sort_by(|a, b| a.pci_address.cmp(&b.pci_address));
        Ok(NodeInventory {
            sriov_accelerators: accelerators,
        })
    }

    fn describe(&self, address: &str, vendor: &str, device: &str) -> SriovAccelerator {
        let max_virtual_functions = self
            .bus
            .read_attribute(address, "sriov_totalvfs")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let vf_addresses = self.bus.virtual_functions(address).unwrap_or_else(|e| {
            warn!("Failed to list VFs of {}: {}", address, e);
            Vec::new()
        });
        let virtual_functions = vf_addresses
            .into_iter()
            .map(|vf| VirtualFunction {
                driver: self.driver_name(&vf),
                device_id: pci_id(&self.bus.read_attribute(&vf, "device").unwrap_or_default()),
                pci_address: vf,
            })
            .collect();

        SriovAccelerator {
            vendor_id: pci_id(vendor),
            device_id: pci_id(device),
            pci_address: address.to_string(),
            pf_driver: self.driver_name(address),
            max_virtual_functions,
            virtual_functions,
        }
    }

    fn driver_name(&self, address: &str) -> String {
        match self.bus.driver(address) {
            Ok(driver) => driver.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read driver of {}: {}", address, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::SysfsPciBus;
    use crate::whitelist::TEST_WHITELIST;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;

    fn device(root: &Path, address: &str, class: &str, device: &str, driver: Option<&str>) {
        let dir = root.join("bus/pci/devices").join(address);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("class"), format!("{class}\n")).unwrap();
        fs::write(dir.join("vendor"), "0x8086\n").unwrap();
        fs::write(dir.join("device"), format!("{device}\n")).unwrap();
        if let Some(driver) = driver {
            symlink(format!("../../../bus/pci/drivers/{driver}"), dir.join("driver")).unwrap();
        }
    }

    fn probe(root: &Path) -> InventoryProbe {
        InventoryProbe::new(
            Arc::new(SysfsPciBus::new(root)),
            Arc::new(AcceleratorDiscoveryConfig::from_json(TEST_WHITELIST).unwrap()),
        )
    }

    #[test]
    fn test_discovers_whitelisted_physical_functions() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        // ACC100 PF with two VFs
        device(r, "0000:af:00.0", "0x120000", "0x0d5c", Some("pci-pf-stub"));
        fs::write(r.join("bus/pci/devices/0000:af:00.0/sriov_totalvfs"), "16\n").unwrap();
        device(r, "0000:b0:00.0", "0x120000", "0x0d5d", Some("vfio-pci"));
        device(r, "0000:b0:00.1", "0x120000", "0x0d5d", None);
        symlink("../0000:b0:00.0", r.join("bus/pci/devices/0000:af:00.0/virtfn0")).unwrap();
        symlink("../0000:b0:00.1", r.join("bus/pci/devices/0000:af:00.0/virtfn1")).unwrap();
        // N3000 FPGA_5GNR PF, unbound, no VFs
        device(r, "0000:1d:00.0", "0x120000", "0x0d8f", None);
        fs::write(r.join("bus/pci/devices/0000:1d:00.0/sriov_totalvfs"), "8\n").unwrap();
        // network card, not whitelisted
        device(r, "0000:3b:00.0", "0x020000", "0x158b", Some("i40e"));

        let inventory = probe(r).discover().unwrap();

        assert_eq!(inventory.sriov_accelerators.len(), 2);
        let n3000 = &inventory.sriov_accelerators[0];
        assert_eq!(n3000.pci_address, "0000:1d:00.0");
        assert_eq!(n3000.device_id, "0d8f");
        assert_eq!(n3000.pf_driver, "");
        assert_eq!(n3000.max_virtual_functions, 8);
        assert!(n3000.virtual_functions.is_empty());

        let acc100 = &inventory.sriov_accelerators[1];
        assert_eq!(acc100.vendor_id, "8086");
        assert_eq!(acc100.pf_driver, "pci-pf-stub");
        assert_eq!(acc100.max_virtual_functions, 16);
        let vfs: Vec<_> = acc100
            .virtual_functions
            .iter()
            .map(|vf| (vf.pci_address.as_str(), vf.driver.as_str(), vf.device_id.as_str()))
            .collect();
        assert_eq!(
            vfs,
            vec![("0000:b0:00.0", "vfio-pci", "0d5d"), ("0000:b0:00.1", "", "0d5d")]
        );
    }

    #[test]
    fn test_skips_devices_without_sriov_capability() {
        let root = tempfile::tempdir().unwrap();
        device(root.path(), "0000:af:00.0", "0x120000", "0x0d5c", None);

        let inventory = probe(root.path()).discover().unwrap();
        assert!(inventory.sriov_accelerators.is_empty());
    }

    #[test]
    fn test_unreadable_bus_is_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(probe(root.path()).discover().is_err());
    }
}
