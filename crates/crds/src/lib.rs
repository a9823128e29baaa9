//! Intel accelerator CRD definitions
//!
//! Kubernetes custom resources for SR-IOV FEC accelerators
//! (`sriovfec.intel.com/v2`) and N3000 firmware provisioning
//! (`fpga.intel.com/v1`), plus the admission rules shared by the
//! controllers.

pub mod bbdev;
pub mod condition;
pub mod n3000_cluster;
pub mod n3000_node;
pub mod sriov_fec_cluster_config;
pub mod sriov_fec_node_config;
pub mod validation;

pub use bbdev::*;
pub use condition::*;
pub use n3000_cluster::*;
pub use n3000_node::*;
pub use sriov_fec_cluster_config::*;
pub use sriov_fec_node_config::*;
pub use validation::{ValidationError, validate_bbdev_config};

/// Node label set on every node carrying a supported accelerator.
pub const ACCELERATOR_PRESENT_LABEL: &str = "fpga.intel.com/intel-accelerator-present";
