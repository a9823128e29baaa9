//! Accelerator discovery whitelist
//!
//! Loaded from the `accelerators.json` file mounted into the node agents:
//!
//! ```json
//! {
//!   "VendorID": {"8086": "Intel"},
//!   "Class": "12",
//!   "SubClass": "00",
//!   "Devices": {"0d8f": "FPGA_5GNR", "5052": "FPGA_LTE", "0d5c": "ACC100"}
//! }
//! ```

use crate::error::HostError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Default mount point of the discovery config in the agent pods.
pub const DEFAULT_DISCOVERY_CONFIG: &str = "/sriov_config/config/accelerators.json";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AcceleratorDiscoveryConfig {
    #[serde(rename = "VendorID")]
    pub vendor_ids: BTreeMap<String, String>,

    #[serde(rename = "Class")]
    pub class: String,

    #[serde(rename = "SubClass")]
    pub sub_class: String,

    /// Device id to device name; the name is what `pf_bb_config` expects
    #[serde(rename = "Devices")]
    pub devices: BTreeMap<String, String>,
}

fn normalize(id: &str) -> String {
    id.trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .to_ascii_lowercase()
}

impl AcceleratorDiscoveryConfig {
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let raw = std::fs::read_to_string(path).map_err(|e| HostError::io("read", path, e))?;
        Self::from_json(&raw).map_err(|source| HostError::Whitelist {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Matches a device by its sysfs `class` value (e.g. `0x120000`) and ids.
    pub fn matches(&self, class: &str, vendor_id: &str, device_id: &str) -> bool {
        let class = normalize(class);
        let (Some(base), Some(sub)) = (class.get(0..2), class.get(2..4)) else {
            return false;
        };
        base == normalize(&self.class)
            && sub == normalize(&self.sub_class)
            && self.vendor_ids.keys().any(|v| normalize(v) == normalize(vendor_id))
            && self.device_name(device_id).is_some()
    }

    /// Device name for a device id, e.g. `0d5c` -> `ACC100`.
    pub fn device_name(&self, device_id: &str) -> Option<&str> {
        let wanted = normalize(device_id);
        self.devices
            .iter()
            .find(|(id, _)| normalize(id) == wanted)
            .map(|(_, name)| name.as_str())
    }
}

#[cfg(test)]
pub(crate) const TEST_WHITELIST: &str = r#"{
    "VendorID": {"8086": "Intel"},
    "Class": "12",
    "SubClass": "00",
    "Devices": {"0d8f": "FPGA_5GNR", "5052": "FPGA_LTE", "0d5c": "ACC100"}
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_sysfs_values() {
        let config = AcceleratorDiscoveryConfig::from_json(TEST_WHITELIST).unwrap();
        assert!(config.matches("0x120000", "0x8086", "0x0d5c"));
        assert!(config.matches("0x120001", "0x8086", "0x5052"));
        assert!(!config.matches("0x020000", "0x8086", "0x0d5c"));
        assert!(!config.matches("0x120000", "0x1234", "0x0d5c"));
        assert!(!config.matches("0x120000", "0x8086", "0x158b"));
        assert!(!config.matches("0x1", "0x8086", "0x0d5c"));
    }

    #[test]
    fn test_device_name_lookup() {
        let config = AcceleratorDiscoveryConfig::from_json(TEST_WHITELIST).unwrap();
        assert_eq!(config.device_name("0x0D8F"), Some("FPGA_5GNR"));
        assert_eq!(config.device_name("ffff"), None);
    }

    #[test]
    fn test_load_reports_path_on_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accelerators.json");
        std::fs::write(&path, "{").unwrap();
        let err = AcceleratorDiscoveryConfig::load(&path).unwrap_err();
        assert!(matches!(err, HostError::Whitelist { .. }));
    }
}
