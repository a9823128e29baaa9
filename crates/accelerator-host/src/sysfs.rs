//! PCI sysfs access
//!
//! `PciBus` is the narrow surface the probe and the configurator need from
//! `/sys/bus/pci`. `SysfsPciBus` reads and writes the real files; the
//! simulated bus in `mock` emulates the kernel's reaction to those writes.

use crate::error::HostError;
use std::fs;
use std::path::{Path, PathBuf};

/// PCI device and driver attributes.
pub trait PciBus: Send + Sync {
    /// Addresses of every PCI device, sorted.
    fn devices(&self) -> Result<Vec<String>, HostError>;

    /// Reads a device attribute, trimmed.
    fn read_attribute(&self, address: &str, attribute: &str) -> Result<String, HostError>;

    fn has_attribute(&self, address: &str, attribute: &str) -> bool;

    /// Name of the driver the device is bound to, if any.
    fn driver(&self, address: &str) -> Result<Option<String>, HostError>;

    /// VF addresses behind a PF, in `virtfn` index order.
    fn virtual_functions(&self, address: &str) -> Result<Vec<String>, HostError>;

    fn write_attribute(&self, address: &str, attribute: &str, value: &str) -> Result<(), HostError>;

    /// Writes to `<drivers>/<driver>/<attribute>` (`bind`, `unbind`).
    fn write_driver_attribute(&self, driver: &str, attribute: &str, value: &str) -> Result<(), HostError>;
}

/// `PciBus` over a sysfs mount, normally `/sys`.
#[derive(Debug, Clone)]
pub struct SysfsPciBus {
    devices: PathBuf,
    drivers: PathBuf,
}

impl SysfsPciBus {
    pub fn new(sysfs_root: impl AsRef<Path>) -> Self {
        let pci = sysfs_root.as_ref().join("bus").join("pci");
        Self {
            devices: pci.join("devices"),
            drivers: pci.join("drivers"),
        }
    }

    fn device_path(&self, address: &str) -> PathBuf {
        self.devices.join(address)
    }
}

fn link_name(path: &Path) -> Result<Option<String>, HostError> {
    match fs::read_link(path) {
        Ok(target) => Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HostError::io("readlink", path, e)),
    }
}

impl PciBus for SysfsPciBus {
    fn devices(&self) -> Result<Vec<String>, HostError> {
        let entries =
            fs::read_dir(&self.devices).map_err(|e| HostError::io("list", &self.devices, e))?;
        let mut addresses = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HostError::io("list", &self.devices, e))?;
            addresses.push(entry.file_name().to_string_lossy().into_owned());
        }
        addresses.sort();
        Ok(addresses)
    }

    fn read_attribute(&self, address: &str, attribute: &str) -> Result<String, HostError> {
        let path = self.device_path(address).join(attribute);
        fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| HostError::io("read", path, e))
    }

    fn has_attribute(&self, address: &str, attribute: &str) -> bool {
        self.device_path(address).join(attribute).exists()
    }

    fn driver(&self, address: &str) -> Result<Option<String>, HostError> {
        link_name(&self.device_path(address).join("driver"))
    }

    fn virtual_functions(&self, address: &str) -> Result<Vec<String>, HostError> {
        let dir = self.device_path(address);
        let entries = fs::read_dir(&dir).map_err(|e| HostError::io("list", &dir, e))?;
        let mut vfs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HostError::io("list", &dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(index) = name.strip_prefix("virtfn").and_then(|i| i.parse::<u32>().ok())
            else {
                continue;
            };
            if let Some(vf) = link_name(&entry.path())? {
                vfs.push((index, vf));
            }
        }
        vfs.sort();
        Ok(vfs.into_iter().map(|(_, vf)| vf).collect())
    }

    fn write_attribute(&self, address: &str, attribute: &str, value: &str) -> Result<(), HostError> {
        let path = self.device_path(address).join(attribute);
        fs::write(&path, value).map_err(|e| HostError::io("write", path, e))
    }

    fn write_driver_attribute(&self, driver: &str, attribute: &str, value: &str) -> Result<(), HostError> {
        let path = self.drivers.join(driver).join(attribute);
        fs::write(&path, value).map_err(|e| HostError::io("write", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn fixture() -> (tempfile::TempDir, SysfsPciBus) {
        let root = tempfile::tempdir().unwrap();
        let pci = root.path().join("bus/pci");
        let pf = pci.join("devices/0000:14:00.1");
        fs::create_dir_all(&pf).unwrap();
        fs::create_dir_all(pci.join("devices/0000:15:00.0")).unwrap();
        fs::create_dir_all(pci.join("devices/0000:15:00.1")).unwrap();
        fs::create_dir_all(pci.join("drivers/pci-pf-stub")).unwrap();
        fs::write(pf.join("sriov_totalvfs"), "8\n").unwrap();
        symlink("../../../bus/pci/drivers/pci-pf-stub", pf.join("driver")).unwrap();
        // virtfn10 sorts before virtfn2 lexically
        symlink("../0000:15:00.1", pf.join("virtfn10")).unwrap();
        symlink("../0000:15:00.0", pf.join("virtfn2")).unwrap();
        let bus = SysfsPciBus::new(root.path());
        (root, bus)
    }

    #[test]
    fn test_reads_attributes_and_links() {
        let (_root, bus) = fixture();
        assert_eq!(
            bus.devices().unwrap(),
            vec!["0000:14:00.1", "0000:15:00.0", "0000:15:00.1"]
        );
        assert_eq!(bus.read_attribute("0000:14:00.1", "sriov_totalvfs").unwrap(), "8");
        assert!(bus.has_attribute("0000:14:00.1", "sriov_totalvfs"));
        assert!(!bus.has_attribute("0000:15:00.0", "sriov_totalvfs"));
        assert_eq!(bus.driver("0000:14:00.1").unwrap().as_deref(), Some("pci-pf-stub"));
        assert_eq!(bus.driver("0000:15:00.0").unwrap(), None);
    }

    #[test]
    fn test_virtual_functions_in_index_order() {
        let (_root, bus) = fixture();
        assert_eq!(
            bus.virtual_functions("0000:14:00.1").unwrap(),
            vec!["0000:15:00.0", "0000:15:00.1"]
        );
    }

    #[test]
    fn test_writes_device_and_driver_files() {
        let (root, bus) = fixture();
        bus.write_attribute("0000:14:00.1", "driver_override", "pci-pf-stub").unwrap();
        bus.write_driver_attribute("pci-pf-stub", "bind", "0000:14:00.1").unwrap();

        let pci = root.path().join("bus/pci");
        assert_eq!(
            fs::read_to_string(pci.join("devices/0000:14:00.1/driver_override")).unwrap(),
            "pci-pf-stub"
        );
        assert_eq!(
            fs::read_to_string(pci.join("drivers/pci-pf-stub/bind")).unwrap(),
            "0000:14:00.1"
        );
    }

    #[test]
    fn test_missing_device_directory_is_error() {
        let root = tempfile::tempdir().unwrap();
        let bus = SysfsPciBus::new(root.path());
        assert!(matches!(bus.devices(), Err(HostError::Io { .. })));
    }
}
