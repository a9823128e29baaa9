//! Host-side accelerator management
//!
//! Everything the node agents do on the machine itself:
//!
//! - `inventory`: discover whitelisted SR-IOV accelerators in PCI sysfs
//! - `configurator`: bind drivers, create VFs and program queues
//! - `kernel`: check and stage IOMMU kernel parameters, request reboots
//! - `n3000`: download and flash N3000 FPGA and Fortville firmware
//!
//! Sysfs and external tools are reached through the `PciBus` and
//! `CommandRunner` traits. The `test-util` feature provides in-memory
//! implementations of both.

pub mod bbdev;
pub mod configurator;
pub mod error;
pub mod exec;
pub mod inventory;
pub mod kernel;
pub mod n3000;
pub mod sysfs;
pub mod whitelist;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use configurator::NodeConfigurator;
pub use error::HostError;
pub use exec::{CommandRunner, HostCommand, HostCommandRunner};
pub use inventory::InventoryProbe;
pub use kernel::KernelController;
pub use sysfs::{PciBus, SysfsPciBus};
pub use whitelist::AcceleratorDiscoveryConfig;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{FakeCommandRunner, SimulatedPciBus};
