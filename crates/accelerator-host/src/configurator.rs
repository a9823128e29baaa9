//! SR-IOV FEC node configurator
//!
//! Drives a node from its current PCI state to the requested PF/VF layout:
//! loads drivers, rebinds PFs, creates VFs, binds them, programs queues with
//! `pf_bb_config` and enables PCI bus mastering on stub-bound PFs.

use crate::bbdev::render_ini;
use crate::error::HostError;
use crate::exec::{CommandRunner, HostCommand};
use crate::inventory::InventoryProbe;
use crate::sysfs::PciBus;
use crds::{PhysicalFunctionConfigExt, SriovAccelerator, SriovFecNodeConfigSpec};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static PF_STUB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pci[-_]pf[-_]stub").unwrap_or_else(|_| unreachable!("static regex"))
});

/// PCI COMMAND register bus-master enable bit.
const COMMAND_BUS_MASTER: u16 = 0x4;

/// Default location of the `pf_bb_config` binary inside the agent image.
pub const DEFAULT_PF_BB_CONFIG: &str = "pf_bb_config";

/// Sysfs name of a driver given the spelling used in specs.
fn sysfs_driver(driver: &str) -> String {
    if PF_STUB.is_match(driver) {
        "pci-pf-stub".to_string()
    } else {
        driver.to_string()
    }
}

/// Attribute that controls the VF count under a given PF driver.
fn vf_count_attribute(pf_driver: &str) -> Result<&'static str, HostError> {
    if PF_STUB.is_match(pf_driver) {
        Ok("sriov_numvfs")
    } else if pf_driver == "igb_uio" {
        Ok("max_vfs")
    } else {
        Err(HostError::UnsupportedDriver(pf_driver.to_string()))
    }
}

/// Parses `setpci -v` output such as `0000:14:00.1 @04 = 0102`.
fn parse_setpci_value(output: &str) -> Result<u16, HostError> {
    let raw = output.rsplit('=').next().unwrap_or(output).trim();
    u16::from_str_radix(raw, 16).map_err(|e| HostError::parse("setpci output", format!("{raw:?}: {e}")))
}

/// Applies `SriovFecNodeConfigSpec` to the local host.
#[derive(Clone)]
pub struct NodeConfigurator {
    probe: InventoryProbe,
    bus: Arc<dyn PciBus>,
    host: Arc<dyn CommandRunner>,
    tools: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    pf_bb_config: String,
}

impl NodeConfigurator {
    /// `host` runs tools inside the host root, `tools` runs binaries shipped
    /// with the agent (`pf_bb_config`).
    pub fn new(
        probe: InventoryProbe,
        bus: Arc<dyn PciBus>,
        host: Arc<dyn CommandRunner>,
        tools: Arc<dyn CommandRunner>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            probe,
            bus,
            host,
            tools,
            workdir: workdir.into(),
            pf_bb_config: DEFAULT_PF_BB_CONFIG.to_string(),
        }
    }

    #[must_use]
    pub fn with_pf_bb_config(mut self, program: impl Into<String>) -> Self {
        self.pf_bb_config = program.into();
        self
    }

    /// Applies the spec. Aborts on the first failing step.
    pub async fn apply(&self, spec: &SriovFecNodeConfigSpec) -> Result<(), HostError> {
        for pf in &spec.physical_functions {
            pf.validate().map_err(|source| HostError::InvalidBBDevConfig {
                pci_address: pf.pci_address.clone(),
                source,
            })?;
        }

        let inventory = self.probe.discover()?;

        for acc in &inventory.sriov_accelerators {
            let requested = spec
                .physical_functions
                .iter()
                .any(|pf| pf.pci_address == acc.pci_address);
            if !requested && !acc.virtual_functions.is_empty() {
                info!("Removing VFs from unconfigured accelerator {}", acc.pci_address);
                self.set_vf_count(&acc.pf_driver, &acc.pci_address, 0)?;
            }
        }

        for pf in &spec.physical_functions {
            let acc = inventory
                .accelerator(&pf.pci_address)
                .ok_or_else(|| HostError::AcceleratorNotFound(pf.pci_address.clone()))?;
            self.configure_physical_function(pf, acc).await?;
        }
        Ok(())
    }

    async fn configure_physical_function(
        &self,
        pf: &PhysicalFunctionConfigExt,
        acc: &SriovAccelerator,
    ) -> Result<(), HostError> {
        let address = pf.pci_address.as_str();
        info!(
            "Configuring {}: pfDriver={} vfDriver={} vfAmount={}",
            address, pf.pf_driver, pf.vf_driver, pf.vf_amount
        );

        self.load_driver("pfDriver", &pf.pf_driver).await?;
        self.load_driver("vfDriver", &pf.vf_driver).await?;

        if !acc.virtual_functions.is_empty() {
            self.set_vf_count(&acc.pf_driver, address, 0)?;
        }
        self.bind(address, &pf.pf_driver)?;
        self.set_vf_count(&pf.pf_driver, address, pf.vf_amount)?;

        for vf in self.bus.virtual_functions(address)? {
            self.bind(&vf, &pf.vf_driver)?;
        }

        if let Some(ini) = render_ini(&pf.bb_dev_config) {
            let device_name = self
                .probe
                .whitelist()
                .device_name(&acc.device_id)
                .ok_or_else(|| {
                    HostError::InvalidConfig(format!(
                        "no device name for device id {} at {}",
                        acc.device_id, address
                    ))
                })?
                .to_string();
            self.program_queues(&device_name, address, &ini).await?;
        }

        if PF_STUB.is_match(&pf.pf_driver) {
            self.enable_bus_master(address).await?;
        }
        Ok(())
    }

    async fn load_driver(&self, field: &str, driver: &str) -> Result<(), HostError> {
        if driver.is_empty() {
            return Err(HostError::InvalidConfig(format!("{field} must not be empty")));
        }
        self.host.run(&HostCommand::new("modprobe").arg(driver)).await?;
        Ok(())
    }

    fn bind(&self, address: &str, driver: &str) -> Result<(), HostError> {
        let driver = sysfs_driver(driver);
        if let Some(current) = self.bus.driver(address)? {
            debug!("Unbinding {} from {}", address, current);
            self.bus.write_driver_attribute(&current, "unbind", address)?;
        }
        self.bus.write_attribute(address, "driver_override", &driver)?;
        self.bus.write_driver_attribute(&driver, "bind", address)?;
        debug!("Bound {} to {}", address, driver);
        Ok(())
    }

    fn set_vf_count(&self, pf_driver: &str, address: &str, count: u32) -> Result<(), HostError> {
        let attribute = vf_count_attribute(pf_driver)?;
        let current = self
            .bus
            .read_attribute(address, attribute)
            .ok()
            .and_then(|v| v.parse::<u32>().ok());
        if current == Some(count) {
            return Ok(());
        }
        info!("Setting {} of {} to {}", attribute, address, count);
        self.bus.write_attribute(address, attribute, &count.to_string())
    }

    async fn program_queues(&self, device_name: &str, address: &str, ini: &str) -> Result<(), HostError> {
        let path = self.workdir.join(format!("{address}.ini"));
        tokio::fs::write(&path, ini)
            .await
            .map_err(|e| HostError::io("write", &path, e))?;

        let command = HostCommand::new(&self.pf_bb_config).args([
            device_name.to_string(),
            "-c".to_string(),
            path.to_string_lossy().into_owned(),
            "-p".to_string(),
            address.to_string(),
        ]);
        let result = self.tools.run(&command).await;
        remove_quietly(&path).await;
        result.map(|_| ())
    }

    async fn enable_bus_master(&self, address: &str) -> Result<(), HostError> {
        let read = HostCommand::new("setpci").args(["-v", "-s", address, "COMMAND"]);
        let value = parse_setpci_value(&self.host.run(&read).await?)?;
        if value & COMMAND_BUS_MASTER != 0 {
            debug!("Bus mastering already enabled on {}", address);
            return Ok(());
        }
        let write = HostCommand::new("setpci").args([
            "-v".to_string(),
            "-s".to_string(),
            address.to_string(),
            format!("COMMAND=0{:x}", value | COMMAND_BUS_MASTER),
        ]);
        self.host.run(&write).await?;
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeCommandRunner, SimulatedPciBus};
    use crate::whitelist::{AcceleratorDiscoveryConfig, TEST_WHITELIST};
    use crds::{BBDevConfig, N3000BBDevConfig, UplinkDownlink, UplinkDownlinkQueues};

    struct Harness {
        bus: SimulatedPciBus,
        runner: FakeCommandRunner,
        workdir: tempfile::TempDir,
        configurator: NodeConfigurator,
    }

    fn harness() -> Harness {
        let bus = SimulatedPciBus::new();
        bus.add_physical_function("0000:14:00.1", "0d8f", 8, None, "0d90");
        bus.add_physical_function("0000:af:00.0", "0d5c", 16, Some("pci-pf-stub"), "0d5d");
        let runner = FakeCommandRunner::new();
        runner.respond("setpci", "0000:14:00.1 @04 = 0102\n");
        let workdir = tempfile::tempdir().unwrap();
        let whitelist = Arc::new(AcceleratorDiscoveryConfig::from_json(TEST_WHITELIST).unwrap());
        let probe = InventoryProbe::new(Arc::new(bus.clone()), whitelist);
        let configurator = NodeConfigurator::new(
            probe,
            Arc::new(bus.clone()),
            Arc::new(runner.clone()),
            Arc::new(runner.clone()),
            workdir.path(),
        );
        Harness {
            bus,
            runner,
            workdir,
            configurator,
        }
    }

    fn n3000_pf(vf_amount: u32) -> PhysicalFunctionConfigExt {
        let link = UplinkDownlink {
            bandwidth: 3,
            load_balance: 128,
            queues: UplinkDownlinkQueues {
                vf0: 16,
                vf1: 16,
                ..Default::default()
            },
        };
        PhysicalFunctionConfigExt {
            pci_address: "0000:14:00.1".to_string(),
            pf_driver: "pci-pf-stub".to_string(),
            vf_driver: "vfio-pci".to_string(),
            vf_amount,
            bb_dev_config: BBDevConfig {
                n3000: Some(N3000BBDevConfig {
                    uplink: link.clone(),
                    downlink: link,
                    flr_timeout: 610,
                    ..Default::default()
                }),
                acc100: None,
            },
        }
    }

    fn spec(pfs: Vec<PhysicalFunctionConfigExt>) -> SriovFecNodeConfigSpec {
        SriovFecNodeConfigSpec {
            physical_functions: pfs,
            drain_skip: false,
        }
    }

    #[tokio::test]
    async fn test_apply_creates_and_binds_vfs() {
        let h = harness();
        h.configurator.apply(&spec(vec![n3000_pf(4)])).await.unwrap();

        let vfs = h.bus.virtual_functions("0000:14:00.1").unwrap();
        assert_eq!(vfs.len(), 4);
        for vf in &vfs {
            assert_eq!(h.bus.driver(vf).unwrap().as_deref(), Some("vfio-pci"));
        }
        assert_eq!(h.bus.driver("0000:14:00.1").unwrap().as_deref(), Some("pci-pf-stub"));

        let lines = h.runner.command_lines();
        assert!(lines.contains(&"modprobe pci-pf-stub".to_string()));
        assert!(lines.contains(&"modprobe vfio-pci".to_string()));
        let ini = h.workdir.path().join("0000:14:00.1.ini");
        assert!(lines.contains(&format!(
            "pf_bb_config FPGA_5GNR -c {} -p 0000:14:00.1",
            ini.display()
        )));
        assert!(!ini.exists(), "INI file is removed after programming");
        assert_eq!(
            lines.last().map(String::as_str),
            Some("setpci -v -s 0000:14:00.1 COMMAND=0106")
        );
    }

    #[tokio::test]
    async fn test_apply_twice_converges_to_same_state() {
        let h = harness();
        let desired = spec(vec![n3000_pf(4)]);
        h.configurator.apply(&desired).await.unwrap();
        let first = h.configurator.probe.discover().unwrap();

        h.configurator.apply(&desired).await.unwrap();
        let second = h.configurator.probe.discover().unwrap();

        assert_eq!(first, second);
        assert!(desired.is_satisfied_by(&second));
    }

    #[tokio::test]
    async fn test_unlisted_accelerators_are_zeroed() {
        let h = harness();
        h.bus.write_attribute("0000:af:00.0", "sriov_numvfs", "2").unwrap();

        h.configurator.apply(&spec(vec![n3000_pf(2)])).await.unwrap();

        assert!(h.bus.virtual_functions("0000:af:00.0").unwrap().is_empty());
        assert_eq!(h.bus.virtual_functions("0000:14:00.1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_vfs_are_zeroed_before_resize() {
        let h = harness();
        h.configurator.apply(&spec(vec![n3000_pf(2)])).await.unwrap();
        h.configurator.apply(&spec(vec![n3000_pf(4)])).await.unwrap();
        assert_eq!(h.bus.virtual_functions("0000:14:00.1").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_bus_master_left_alone_when_already_set() {
        let h = harness();
        h.runner.respond("setpci", "0000:14:00.1 @04 = 0106\n");
        let mut pf = n3000_pf(1);
        pf.bb_dev_config = BBDevConfig::default();
        // first scripted answer is consumed by the read
        h.configurator.apply(&spec(vec![pf])).await.unwrap();
        let writes: Vec<_> = h
            .runner
            .command_lines()
            .into_iter()
            .filter(|l| l.contains("COMMAND="))
            .collect();
        assert_eq!(writes, vec!["setpci -v -s 0000:14:00.1 COMMAND=0106"]);

        h.configurator
            .apply(&spec(vec![{
                let mut pf = n3000_pf(1);
                pf.bb_dev_config = BBDevConfig::default();
                pf
            }]))
            .await
            .unwrap();
        let writes = h
            .runner
            .command_lines()
            .into_iter()
            .filter(|l| l.contains("COMMAND="))
            .count();
        assert_eq!(writes, 1, "bit already set, no second write");
    }

    #[tokio::test]
    async fn test_unknown_pci_address_is_error() {
        let h = harness();
        let mut pf = n3000_pf(1);
        pf.pci_address = "0000:99:00.0".to_string();
        let err = h.configurator.apply(&spec(vec![pf])).await.unwrap_err();
        assert!(matches!(err, HostError::AcceleratorNotFound(_)));
    }

    #[tokio::test]
    async fn test_unsupported_pf_driver_is_error() {
        let h = harness();
        let mut pf = n3000_pf(1);
        pf.pf_driver = "vfio-pci".to_string();
        let err = h.configurator.apply(&spec(vec![pf])).await.unwrap_err();
        assert!(matches!(err, HostError::UnsupportedDriver(d) if d == "vfio-pci"));
    }

    #[tokio::test]
    async fn test_invalid_queue_config_touches_nothing() {
        let h = harness();
        let mut pf = n3000_pf(1);
        if let Some(n3000) = pf.bb_dev_config.n3000.as_mut() {
            n3000.uplink.queues.vf2 = 8;
        }
        let err = h.configurator.apply(&spec(vec![pf])).await.unwrap_err();
        assert!(matches!(err, HostError::InvalidBBDevConfig { .. }));
        assert!(h.bus.journal().is_empty());
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pf_bb_config_failure_still_removes_ini() {
        let h = harness();
        h.runner.fail("pf_bb_config", "device busy");
        let err = h.configurator.apply(&spec(vec![n3000_pf(2)])).await.unwrap_err();
        assert!(matches!(err, HostError::CommandFailed { .. }));
        assert!(!h.workdir.path().join("0000:14:00.1.ini").exists());
    }

    #[tokio::test]
    async fn test_igb_uio_uses_max_vfs() {
        let h = harness();
        let mut pf = n3000_pf(2);
        pf.pf_driver = "igb_uio".to_string();
        pf.vf_driver = "igb_uio".to_string();
        h.configurator.apply(&spec(vec![pf])).await.unwrap();

        assert!(h
            .bus
            .journal()
            .contains(&"devices/0000:14:00.1/max_vfs=2".to_string()));
        assert!(h.runner.calls_to("setpci").is_empty());
    }

    #[test]
    fn test_parse_setpci_value() {
        assert_eq!(parse_setpci_value("0000:14:00.1 @04 = 0102\n").unwrap(), 0x0102);
        assert_eq!(parse_setpci_value("0146").unwrap(), 0x0146);
        assert!(parse_setpci_value("garbage").is_err());
    }
}
