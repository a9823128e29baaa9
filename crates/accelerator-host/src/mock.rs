//! In-memory host doubles for unit tests
//!
//! `SimulatedPciBus` behaves like the kernel's PCI sysfs for the writes the
//! configurator performs; `FakeCommandRunner` records tool invocations and
//! returns scripted output.

use crate::error::HostError;
use crate::exec::{CommandRunner, HostCommand};
use crate::sysfs::PciBus;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sysfs_error(path: String, kind: io::ErrorKind, msg: &str) -> HostError {
    HostError::io("write", PathBuf::from(path), io::Error::new(kind, msg.to_string()))
}

#[derive(Debug, Clone, Default)]
struct SimDevice {
    attributes: BTreeMap<String, String>,
    driver: Option<String>,
    vfs: Vec<String>,
    vf_device_id: String,
}

#[derive(Debug, Default)]
struct SimState {
    devices: BTreeMap<String, SimDevice>,
    journal: Vec<String>,
    failing: Vec<String>,
}

/// Emulated PCI bus.
///
/// Writing a count to `sriov_numvfs` (or `max_vfs` under `igb_uio`) creates
/// VF devices on the next bus number; changing a non-zero count to another
/// non-zero count fails like the kernel does. `bind` honours
/// `driver_override`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPciBus {
    state: Arc<Mutex<SimState>>,
}

fn vf_address(pf: &str, index: usize) -> String {
    let mut parts = pf.splitn(2, ':');
    let domain = parts.next().unwrap_or("0000");
    let bus = parts
        .next()
        .and_then(|rest| rest.get(0..2))
        .and_then(|b| u8::from_str_radix(b, 16).ok())
        .unwrap_or(0);
    format!(
        "{domain}:{:02x}:{:02x}.{}",
        bus.wrapping_add(1),
        index / 8,
        index % 8
    )
}

impl SimulatedPciBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an SR-IOV capable accelerator PF (vendor 8086, class 0x120000).
    pub fn add_physical_function(
        &self,
        address: &str,
        device_id: &str,
        total_vfs: u32,
        driver: Option<&str>,
        vf_device_id: &str,
    ) {
        let mut attributes = BTreeMap::new();
        attributes.insert("class".to_string(), "0x120000".to_string());
        attributes.insert("vendor".to_string(), "0x8086".to_string());
        attributes.insert("device".to_string(), format!("0x{device_id}"));
        attributes.insert("sriov_totalvfs".to_string(), total_vfs.to_string());
        attributes.insert("sriov_numvfs".to_string(), "0".to_string());
        let device = SimDevice {
            attributes,
            driver: driver.map(str::to_string),
            vfs: Vec::new(),
            vf_device_id: vf_device_id.to_string(),
        };
        lock(&self.state).devices.insert(address.to_string(), device);
    }

    /// Adds an arbitrary device without SR-IOV capability.
    pub fn add_device(&self, address: &str, class: &str, device_id: &str, driver: Option<&str>) {
        let mut attributes = BTreeMap::new();
        attributes.insert("class".to_string(), class.to_string());
        attributes.insert("vendor".to_string(), "0x8086".to_string());
        attributes.insert("device".to_string(), format!("0x{device_id}"));
        let device = SimDevice {
            attributes,
            driver: driver.map(str::to_string),
            ..Default::default()
        };
        lock(&self.state).devices.insert(address.to_string(), device);
    }

    /// Makes every later write to `attribute` fail with EIO.
    pub fn fail_writes_to(&self, attribute: &str) {
        lock(&self.state).failing.push(attribute.to_string());
    }

    /// Every successful write so far, as `path=value`.
    pub fn journal(&self) -> Vec<String> {
        lock(&self.state).journal.clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }

    /// Drops all runtime state a reboot wipes: VFs, bindings, overrides.
    pub fn reboot(&self) {
        let mut state = lock(&self.state);
        let vfs: Vec<String> = state
            .devices
            .values()
            .flat_map(|d| d.vfs.iter().cloned())
            .collect();
        for vf in vfs {
            state.devices.remove(&vf);
        }
        for device in state.devices.values_mut() {
            device.vfs.clear();
            device.driver = None;
            device.attributes.remove("driver_override");
            device.attributes.remove("max_vfs");
            if device.attributes.contains_key("sriov_numvfs") {
                device.attributes.insert("sriov_numvfs".to_string(), "0".to_string());
            }
        }
    }

    fn set_vf_count(state: &mut SimState, address: &str, attribute: &str, value: &str) -> Result<(), HostError> {
        let path = format!("devices/{address}/{attribute}");
        let requested: usize = value
            .trim()
            .parse()
            .map_err(|_parse| sysfs_error(path.clone(), io::ErrorKind::InvalidInput, "invalid count"))?;
        let device = state
            .devices
            .get(address)
            .cloned()
            .ok_or_else(|| sysfs_error(path.clone(), io::ErrorKind::NotFound, "no such device"))?;
        if attribute == "max_vfs" && device.driver.as_deref() != Some("igb_uio") {
            return Err(sysfs_error(path, io::ErrorKind::NotFound, "max_vfs requires igb_uio"));
        }
        let total: usize = device
            .attributes
            .get("sriov_totalvfs")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let current = device.vfs.len();
        if requested > total {
            return Err(sysfs_error(path, io::ErrorKind::InvalidInput, "exceeds sriov_totalvfs"));
        }
        if current > 0 && requested > 0 && current != requested {
            return Err(sysfs_error(path, io::ErrorKind::ResourceBusy, "device busy"));
        }

        for vf in &device.vfs {
            state.devices.remove(vf);
        }
        let mut vfs = Vec::with_capacity(requested);
        for index in 0..requested {
            let vf = vf_address(address, index);
            let mut attributes = BTreeMap::new();
            attributes.insert("class".to_string(), "0x120000".to_string());
            attributes.insert("vendor".to_string(), "0x8086".to_string());
            attributes.insert("device".to_string(), format!("0x{}", device.vf_device_id));
            state.devices.insert(
                vf.clone(),
                SimDevice {
                    attributes,
                    ..Default::default()
                },
            );
            vfs.push(vf);
        }
        if let Some(pf) = state.devices.get_mut(address) {
            pf.vfs = vfs;
            pf.attributes
                .insert(attribute.to_string(), requested.to_string());
        }
        Ok(())
    }
}

impl PciBus for SimulatedPciBus {
    fn devices(&self) -> Result<Vec<String>, HostError> {
        Ok(lock(&self.state).devices.keys().cloned().collect())
    }

    fn read_attribute(&self, address: &str, attribute: &str) -> Result<String, HostError> {
        let state = lock(&self.state);
        let device = state.devices.get(address);
        let value = match (device, attribute) {
            (Some(d), "max_vfs") if d.driver.as_deref() == Some("igb_uio") => {
                Some(d.attributes.get("max_vfs").cloned().unwrap_or_else(|| "0".to_string()))
            }
            (Some(d), _) => d.attributes.get(attribute).cloned(),
            (None, _) => None,
        };
        value.ok_or_else(|| {
            HostError::io(
                "read",
                format!("devices/{address}/{attribute}"),
                io::Error::new(io::ErrorKind::NotFound, "no such attribute"),
            )
        })
    }

    fn has_attribute(&self, address: &str, attribute: &str) -> bool {
        lock(&self.state)
            .devices
            .get(address)
            .is_some_and(|d| d.attributes.contains_key(attribute))
    }

    fn driver(&self, address: &str) -> Result<Option<String>, HostError> {
        Ok(lock(&self.state)
            .devices
            .get(address)
            .and_then(|d| d.driver.clone()))
    }

    fn virtual_functions(&self, address: &str) -> Result<Vec<String>, HostError> {
        Ok(lock(&self.state)
            .devices
            .get(address)
            .map(|d| d.vfs.clone())
            .unwrap_or_default())
    }

    fn write_attribute(&self, address: &str, attribute: &str, value: &str) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        let path = format!("devices/{address}/{attribute}");
        if state.failing.iter().any(|a| a == attribute) {
            return Err(sysfs_error(path, io::ErrorKind::Other, "injected failure"));
        }
        match attribute {
            "sriov_numvfs" | "max_vfs" => Self::set_vf_count(&mut state, address, attribute, value)?,
            _ => {
                let device = state
                    .devices
                    .get_mut(address)
                    .ok_or_else(|| sysfs_error(path.clone(), io::ErrorKind::NotFound, "no such device"))?;
                device.attributes.insert(attribute.to_string(), value.to_string());
            }
        }
        state.journal.push(format!("{path}={value}"));
        Ok(())
    }

    fn write_driver_attribute(&self, driver: &str, attribute: &str, value: &str) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        let path = format!("drivers/{driver}/{attribute}");
        if state.failing.iter().any(|a| a == attribute) {
            return Err(sysfs_error(path, io::ErrorKind::Other, "injected failure"));
        }
        let device = state
            .devices
            .get_mut(value)
            .ok_or_else(|| sysfs_error(path.clone(), io::ErrorKind::NotFound, "no such device"))?;
        match attribute {
            "bind" => {
                if device.driver.is_some() {
                    return Err(sysfs_error(path, io::ErrorKind::ResourceBusy, "already bound"));
                }
                let allowed = device
                    .attributes
                    .get("driver_override")
                    .is_none_or(|o| o.is_empty() || o == driver);
                if !allowed {
                    return Err(sysfs_error(path, io::ErrorKind::InvalidInput, "driver_override mismatch"));
                }
                device.driver = Some(driver.to_string());
            }
            "unbind" => {
                if device.driver.as_deref() != Some(driver) {
                    return Err(sysfs_error(path, io::ErrorKind::NotFound, "not bound to driver"));
                }
                device.driver = None;
            }
            _ => return Err(sysfs_error(path, io::ErrorKind::NotFound, "unknown driver attribute")),
        }
        state.journal.push(format!("{path}={value}"));
        Ok(())
    }
}

type SideEffect = Arc<dyn Fn(&HostCommand) + Send + Sync>;

#[derive(Default)]
struct RunnerState {
    calls: Vec<HostCommand>,
    responses: HashMap<String, VecDeque<Result<String, String>>>,
    side_effects: HashMap<String, SideEffect>,
}

/// Records commands instead of running them.
///
/// Responses are keyed by program name. Several queued responses are handed
/// out in order, the last one repeats. Unscripted programs succeed with empty
/// output.
#[derive(Clone, Default)]
pub struct FakeCommandRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl std::fmt::Debug for FakeCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCommandRunner")
            .field("calls", &lock(&self.state).calls)
            .finish_non_exhaustive()
    }
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues stdout for the next invocation of `program`.
    pub fn respond(&self, program: &str, stdout: &str) {
        lock(&self.state)
            .responses
            .entry(program.to_string())
            .or_default()
            .push_back(Ok(stdout.to_string()));
    }

    /// Queues a non-zero exit for the next invocation of `program`.
    pub fn fail(&self, program: &str, stderr: &str) {
        lock(&self.state)
            .responses
            .entry(program.to_string())
            .or_default()
            .push_back(Err(stderr.to_string()));
    }

    /// Runs `effect` whenever `program` is invoked, before answering.
    pub fn on_run<F>(&self, program: &str, effect: F)
    where
        F: Fn(&HostCommand) + Send + Sync + 'static,
    {
        lock(&self.state)
            .side_effects
            .insert(program.to_string(), Arc::new(effect));
    }

    pub fn calls(&self) -> Vec<HostCommand> {
        lock(&self.state).calls.clone()
    }

    /// Invocations rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn calls_to(&self, program: &str) -> Vec<HostCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, command: &HostCommand) -> Result<String, HostError> {
        let effect = {
            let mut state = lock(&self.state);
            state.calls.push(command.clone());
            state.side_effects.get(&command.program).cloned()
        };
        if let Some(effect) = effect {
            effect(command);
        }

        let mut state = lock(&self.state);
        let response = match state.responses.get_mut(&command.program) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match response {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(stderr)) => Err(HostError::CommandFailed {
                command: command.to_string(),
                status: "exit status: 1".to_string(),
                stderr,
            }),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vf_addresses_follow_pf_bus() {
        assert_eq!(vf_address("0000:14:00.1", 0), "0000:15:00.0");
        assert_eq!(vf_address("0000:af:00.0", 9), "0000:b0:01.1");
    }

    #[test]
    fn test_changing_nonzero_vf_count_is_busy() {
        let bus = SimulatedPciBus::new();
        bus.add_physical_function("0000:14:00.1", "0d8f", 8, Some("pci-pf-stub"), "0d90");
        bus.write_attribute("0000:14:00.1", "sriov_numvfs", "2").unwrap();
        assert!(bus.write_attribute("0000:14:00.1", "sriov_numvfs", "4").is_err());
        bus.write_attribute("0000:14:00.1", "sriov_numvfs", "0").unwrap();
        bus.write_attribute("0000:14:00.1", "sriov_numvfs", "4").unwrap();
        assert_eq!(bus.virtual_functions("0000:14:00.1").unwrap().len(), 4);
    }

    #[test]
    fn test_bind_honours_driver_override() {
        let bus = SimulatedPciBus::new();
        bus.add_device("0000:3b:00.0", "0x120000", "0d5c", None);
        bus.write_attribute("0000:3b:00.0", "driver_override", "vfio-pci").unwrap();
        assert!(bus.write_driver_attribute("igb_uio", "bind", "0000:3b:00.0").is_err());
        bus.write_driver_attribute("vfio-pci", "bind", "0000:3b:00.0").unwrap();
        assert_eq!(bus.driver("0000:3b:00.0").unwrap().as_deref(), Some("vfio-pci"));
    }

    #[tokio::test]
    async fn test_fake_runner_hands_out_responses_in_order() {
        let runner = FakeCommandRunner::new();
        runner.respond("fpgainfo", "first");
        runner.respond("fpgainfo", "second");
        let cmd = HostCommand::new("fpgainfo").arg("bmc");
        assert_eq!(runner.run(&cmd).await.unwrap(), "first");
        assert_eq!(runner.run(&cmd).await.unwrap(), "second");
        assert_eq!(runner.run(&cmd).await.unwrap(), "second");
        assert_eq!(runner.command_lines(), vec!["fpgainfo bmc"; 3]);
    }
}
