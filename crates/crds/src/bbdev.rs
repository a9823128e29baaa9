//! Baseband device queue configuration
//!
//! Shared by `SriovFecClusterConfig` and `SriovFecNodeConfig`. At most one of
//! the device-specific sections may be set.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BBDevConfig {
    /// Queue layout for N3000 FPGA_LTE / FPGA_5GNR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n3000: Option<N3000BBDevConfig>,

    /// Queue layout for ACC100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc100: Option<ACC100BBDevConfig>,
}

impl BBDevConfig {
    /// True if neither device section is set.
    pub fn is_empty(&self) -> bool {
        self.n3000.is_none() && self.acc100.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum NetworkType {
    #[default]
    #[serde(rename = "FPGA_5GNR")]
    Fpga5gnr,
    #[serde(rename = "FPGA_LTE")]
    FpgaLte,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct N3000BBDevConfig {
    #[serde(default)]
    pub network_type: NetworkType,

    #[serde(default)]
    pub pf_mode: bool,

    #[serde(default)]
    pub flr_timeout: u32,

    #[serde(default)]
    pub uplink: UplinkDownlink,

    #[serde(default)]
    pub downlink: UplinkDownlink,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UplinkDownlink {
    #[serde(default)]
    pub bandwidth: u32,

    #[serde(default)]
    pub load_balance: u32,

    #[serde(default)]
    pub queues: UplinkDownlinkQueues,
}

/// Per-VF queue counts (each in 0..=32, total no more than 32)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct UplinkDownlinkQueues {
    #[serde(default)]
    pub vf0: u32,
    #[serde(default)]
    pub vf1: u32,
    #[serde(default)]
    pub vf2: u32,
    #[serde(default)]
    pub vf3: u32,
    #[serde(default)]
    pub vf4: u32,
    #[serde(default)]
    pub vf5: u32,
    #[serde(default)]
    pub vf6: u32,
    #[serde(default)]
    pub vf7: u32,
}

impl UplinkDownlinkQueues {
    pub fn as_array(&self) -> [u32; 8] {
        [
            self.vf0, self.vf1, self.vf2, self.vf3, self.vf4, self.vf5, self.vf6, self.vf7,
        ]
    }

    pub fn total(&self) -> u32 {
        self.as_array().iter().sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ACC100BBDevConfig {
    #[serde(default)]
    pub pf_mode: bool,

    /// Number of VF bundles (1..=16), must equal `vfAmount`
    #[serde(default)]
    pub num_vf_bundles: u32,

    /// Maximum queue size (up to 1024)
    #[serde(default)]
    pub max_queue_size: u32,

    #[serde(default, rename = "uplink4G")]
    pub uplink_4g: QueueGroupConfig,

    #[serde(default, rename = "downlink4G")]
    pub downlink_4g: QueueGroupConfig,

    #[serde(default, rename = "uplink5G")]
    pub uplink_5g: QueueGroupConfig,

    #[serde(default, rename = "downlink5G")]
    pub downlink_5g: QueueGroupConfig,
}

impl ACC100BBDevConfig {
    /// Sum of queue groups over all four directions.
    pub fn total_queue_groups(&self) -> u32 {
        self.uplink_4g.num_queue_groups
            + self.downlink_4g.num_queue_groups
            + self.uplink_5g.num_queue_groups
            + self.downlink_5g.num_queue_groups
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueGroupConfig {
    /// Number of queue groups (up to 8)
    #[serde(default)]
    pub num_queue_groups: u32,

    /// Atomic queues per group (up to 16)
    #[serde(default)]
    pub num_aqs_per_groups: u32,

    /// Log2 of the atomic queue depth (up to 4)
    #[serde(default)]
    pub aq_depth_log2: u32,
}
