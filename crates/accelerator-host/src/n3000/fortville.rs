//! Fortville (XL710/XXV710) NIC firmware on N3000 cards

use super::nvmupdate::{NvmInstance, parse_report_bounded};
use crate::error::HostError;
use crate::exec::{CommandRunner, HostCommand};
use crds::{FortvilleMac, FortvilleModule, N3000FortvilleStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const NVMUPDATE: &str = "nvmupdate64e";
const NVMUPDATE_CONFIG: &str = "nvmupdate.cfg";

/// Device ids of the Fortville controllers found on N3000 cards.
const FORTVILLE_DEVICE_IDS: [&str; 2] = ["d58", "cf8"];

/// nvmupdate may need a second pass when the first stages a newer updater.
const MAX_UPDATE_STEPS: usize = 2;

const NVM_UPDATE_TIMEOUT: Duration = Duration::from_secs(40 * 60);

fn is_fortville(instance: &NvmInstance) -> bool {
    let device = instance.device.trim().trim_start_matches("0x").trim_start_matches('0');
    instance.vendor.trim_start_matches("0x") == "8086"
        && FORTVILLE_DEVICE_IDS.contains(&device.to_ascii_lowercase().as_str())
}

/// `6805CA3AA1C0` style, as nvmupdate expects and reports.
fn plain_mac(mac: &str) -> String {
    mac.chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_ascii_uppercase()
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if entry.file_name() == name {
            return Some(path);
        }
    }
    subdirs.sort();
    subdirs.iter().find_map(|d| find_file(d, name))
}

#[derive(Clone)]
pub struct FortvilleManager {
    tools: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    /// Directory holding an nvmupdate package used for inventory
    inventory_package: PathBuf,
}

impl FortvilleManager {
    pub fn new(
        tools: Arc<dyn CommandRunner>,
        workdir: impl Into<PathBuf>,
        inventory_package: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tools,
            workdir: workdir.into(),
            inventory_package: inventory_package.into(),
        }
    }

    /// Lists Fortville ports with their firmware modules and MACs.
    pub async fn inventory(&self) -> Result<Vec<N3000FortvilleStatus>, HostError> {
        let dir = &self.inventory_package;
        let xml_path = dir.join("inventory.xml");
        let command = HostCommand::new(dir.join(NVMUPDATE).to_string_lossy().into_owned())
            .args(["-i", "-l", "inventory.log", "-o", "inventory.xml", "-c", NVMUPDATE_CONFIG])
            .current_dir(dir);
        self.tools.run(&command).await?;

        let report = parse_report_bounded(read_report(&xml_path).await?).await?;
        Ok(report
            .instances
            .iter()
            .filter(|i| is_fortville(i))
            .map(|i| N3000FortvilleStatus {
                n3000_pci: i.pci_address(),
                name: i.display.clone(),
                device_id: i.device.clone(),
                modules: i
                    .modules
                    .iter()
                    .map(|m| FortvilleModule {
                        type_: m.type_.clone(),
                        version: m.version.clone(),
                    })
                    .collect(),
                macs: i.macs.iter().map(|mac| FortvilleMac { mac: mac.clone() }).collect(),
            })
            .collect())
    }

    /// Extracts the firmware package and updates every listed port.
    ///
    /// Returns true if the host must be rebooted or power cycled for the new
    /// firmware to load.
    pub async fn update(&self, package: &Path, macs: &[FortvilleMac]) -> Result<bool, HostError> {
        let extract_dir = self
            .workdir
            .join(format!("nvmupdate-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&extract_dir)
            .await
            .map_err(|e| HostError::io("create", &extract_dir, e))?;

        let result = self.update_from(package, &extract_dir, macs).await;
        if let Err(e) = tokio::fs::remove_dir_all(&extract_dir).await {
            warn!("Failed to clean up {}: {}", extract_dir.display(), e);
        }
        result
    }

    async fn update_from(&self, package: &Path, extract_dir: &Path, macs: &[FortvilleMac]) -> Result<bool, HostError> {
        self.tools
            .run(&HostCommand::new("tar").args([
                "xzf".to_string(),
                package.to_string_lossy().into_owned(),
                "-C".to_string(),
                extract_dir.to_string_lossy().into_owned(),
            ]))
            .await?;

        let updater = find_file(extract_dir, NVMUPDATE).ok_or_else(|| {
            HostError::FirmwareUpdate(format!("{NVMUPDATE} not found in {}", package.display()))
        })?;
        let package_dir = updater
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| extract_dir.to_path_buf());

        let mut restart_required = false;
        for mac in macs {
            let mac = plain_mac(&mac.mac);
            for step in 1..=MAX_UPDATE_STEPS {
                info!("Updating Fortville NVM for {} (step {})", mac, step);
                let command = HostCommand::new(updater.to_string_lossy().into_owned())
                    .args([
                        "-u",
                        "-m",
                        mac.as_str(),
                        "-c",
                        NVMUPDATE_CONFIG,
                        "-o",
                        "update.xml",
                        "-l",
                        "update.log",
                    ])
                    .current_dir(&package_dir)
                    .timeout(NVM_UPDATE_TIMEOUT);
                self.tools.run(&command).await?;

                let report = parse_report_bounded(read_report(&package_dir.join("update.xml")).await?).await?;
                let failures = report.failures();
                if !failures.is_empty() {
                    return Err(HostError::FirmwareUpdate(format!(
                        "{mac}: {}",
                        failures.join(", ")
                    )));
                }
                restart_required |= report.reboot_required || report.power_cycle_required;
                if !report.next_update_available {
                    break;
                }
            }
        }
        Ok(restart_required)
    }
}

async fn read_report(path: &Path) -> Result<String, HostError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HostError::io("read", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeCommandRunner;
    use crate::n3000::nvmupdate::update_report;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fake_tar(runner: &FakeCommandRunner) {
        runner.on_run("tar", |cmd| {
            let dest = PathBuf::from(&cmd.args[3]);
            let pkg = dest.join("700Series/Linux_x64");
            std::fs::create_dir_all(&pkg).unwrap();
            std::fs::write(pkg.join(NVMUPDATE), "").unwrap();
        });
    }

    fn is_updater(cmd: &HostCommand) -> bool {
        cmd.program.ends_with(NVMUPDATE)
    }

    #[tokio::test]
    async fn test_update_runs_second_step_when_offered() {
        let workdir = tempfile::tempdir().unwrap();
        let runner = FakeCommandRunner::new();
        fake_tar(&runner);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        // the updater program path is only known after extraction
        let writer = move |cmd: &HostCommand| {
            if is_updater(cmd) {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let dir = cmd.dir.clone().unwrap();
                std::fs::write(dir.join("update.xml"), update_report(n == 0, n == 1, "Success")).unwrap();
            }
        };
        let manager = FortvilleManager::new(
            Arc::new(HookedRunner(runner.clone(), Arc::new(writer))),
            workdir.path(),
            workdir.path(),
        );

        let reboot = manager
            .update(
                Path::new("/tmp/fw.tar.gz"),
                &[FortvilleMac {
                    mac: "68:05:ca:3a:a1:c0".to_string(),
                }],
            )
            .await
            .unwrap();

        assert!(reboot);
        assert_eq!(runs.load(Ordering::SeqCst), MAX_UPDATE_STEPS);
        let update = runner.calls().into_iter().find(is_updater_ref).unwrap();
        assert!(update.args.contains(&"6805CA3AA1C0".to_string()));
        let leftovers: Vec<_> = std::fs::read_dir(workdir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "extraction directory is removed");
    }

    #[tokio::test]
    async fn test_failed_module_aborts_update() {
        let workdir = tempfile::tempdir().unwrap();
        let runner = FakeCommandRunner::new();
        fake_tar(&runner);
        let writer = |cmd: &HostCommand| {
            if is_updater(cmd) {
                let dir = cmd.dir.clone().unwrap();
                std::fs::write(dir.join("update.xml"), update_report(true, false, "Fail")).unwrap();
            }
        };
        let manager = FortvilleManager::new(
            Arc::new(HookedRunner(runner.clone(), Arc::new(writer))),
            workdir.path(),
            workdir.path(),
        );

        let err = manager
            .update(Path::new("/tmp/fw.tar.gz"), &[FortvilleMac { mac: "6805CA3AA1C0".to_string() }])
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::FirmwareUpdate(_)));
        assert_eq!(runner.calls().into_iter().filter(is_updater_ref).count(), 1);
    }

    #[tokio::test]
    async fn test_inventory_keeps_fortville_ports() {
        let package = tempfile::tempdir().unwrap();
        std::fs::write(
            package.path().join("inventory.xml"),
            r#"<DeviceInventory>
  <Instance vendor="8086" device="d58" bus="27" dev="0" func="0" display="XXV710">
    <Module type="NVM" version="8000191B"></Module>
    <MACAddresses><MAC address="6805CA3AA1C0"></MAC></MACAddresses>
  </Instance>
  <Instance vendor="8086" device="1572" bus="94" dev="0" func="0" display="X710"></Instance>
</DeviceInventory>"#,
        )
        .unwrap();
        let runner = FakeCommandRunner::new();
        let manager = FortvilleManager::new(Arc::new(runner.clone()), package.path(), package.path());

        let ports = manager.inventory().await.unwrap();

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].n3000_pci, "0000:1b:00.0");
        assert_eq!(ports[0].modules[0].version, "8000191B");
        assert_eq!(ports[0].macs[0].mac, "6805CA3AA1C0");
        assert_eq!(runner.calls()[0].dir.as_deref(), Some(package.path()));
    }

    fn is_updater_ref(cmd: &HostCommand) -> bool {
        is_updater(cmd)
    }

    /// Lets a test react to commands whose program name is not known upfront.
    struct HookedRunner(FakeCommandRunner, Arc<dyn Fn(&HostCommand) + Send + Sync>);

    #[async_trait::async_trait]
    impl CommandRunner for HookedRunner {
        async fn run(&self, command: &HostCommand) -> Result<String, HostError> {
            (self.1)(command);
            self.0.run(command).await
        }
    }
}
