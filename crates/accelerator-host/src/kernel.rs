//! Kernel command-line parameters and host reboot
//!
//! VFIO passthrough of the VFs needs the IOMMU enabled. Missing parameters
//! are staged with the host's own tooling and take effect after a reboot.

use crate::error::HostError;
use crate::exec::{CommandRunner, HostCommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Parameters that must be on the running kernel's command line.
pub const REQUIRED_KERNEL_PARAMS: [&str; 2] = ["intel_iommu=on", "iommu=pt"];

const REBOOT_UNIT: &str = "accelerator-daemon-reboot";

/// Tool used to stage kernel arguments, picked from `os-release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KargsTool {
    RpmOstree,
    Grubby,
}

fn parse_os_release(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_string(),
                v.trim().trim_matches(|c| c == '"' || c == '\'').to_string(),
            )
        })
        .collect()
}

fn kargs_tool(os_release: &HashMap<String, String>) -> Result<KargsTool, HostError> {
    let id = os_release.get("ID").map(String::as_str).unwrap_or_default();
    if id == "rhcos" {
        return Ok(KargsTool::RpmOstree);
    }
    let like_fedora = os_release
        .get("ID_LIKE")
        .is_some_and(|like| like.split_whitespace().any(|l| l == "fedora"));
    if like_fedora {
        return Ok(KargsTool::Grubby);
    }
    Err(HostError::UnsupportedOs(if id.is_empty() {
        "<unknown>".to_string()
    } else {
        id.to_string()
    }))
}

fn missing_params(cmdline: &str) -> Vec<&'static str> {
    REQUIRED_KERNEL_PARAMS
        .iter()
        .copied()
        .filter(|p| !cmdline.contains(*p))
        .collect()
}

/// Inspects and stages kernel parameters on the host.
#[derive(Clone)]
pub struct KernelController {
    host_root: PathBuf,
    host: Arc<dyn CommandRunner>,
}

impl KernelController {
    /// `host_root` is where the host filesystem is mounted (normally `/host`).
    pub fn new(host_root: impl Into<PathBuf>, host: Arc<dyn CommandRunner>) -> Self {
        Self {
            host_root: host_root.into(),
            host,
        }
    }

    async fn read_host_file(&self, relative: &str) -> Result<String, HostError> {
        let path = self.host_root.join(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HostError::io("read", path, e))
    }

    /// True if any required parameter is absent from the running kernel.
    pub async fn is_any_missing(&self) -> Result<bool, HostError> {
        let cmdline = self.read_host_file("proc/cmdline").await?;
        Ok(!missing_params(&cmdline).is_empty())
    }

    /// Stages the missing parameters for the next boot.
    pub async fn add_missing(&self) -> Result<(), HostError> {
        let cmdline = self.read_host_file("proc/cmdline").await?;
        let missing = missing_params(&cmdline);
        if missing.is_empty() {
            return Ok(());
        }
        let os_release = parse_os_release(&self.read_host_file("etc/os-release").await?);

        match kargs_tool(&os_release)? {
            KargsTool::RpmOstree => {
                let staged = self.host.run(&HostCommand::new("rpm-ostree").arg("kargs")).await?;
                for param in missing {
                    if staged.split_whitespace().any(|arg| arg == param) {
                        continue;
                    }
                    info!("Staging kernel parameter {} with rpm-ostree", param);
                    self.host
                        .run(&HostCommand::new("rpm-ostree").args(["kargs", "--append", param]))
                        .await?;
                }
            }
            KargsTool::Grubby => {
                let args = missing.join(" ");
                info!("Staging kernel parameters {} with grubby", args);
                self.host
                    .run(&HostCommand::new("grubby").args([
                        "--update-kernel=DEFAULT".to_string(),
                        format!("--args={args}"),
                    ]))
                    .await?;
            }
        }
        Ok(())
    }

    /// Schedules a reboot in a transient systemd unit so it outlives this process.
    pub async fn request_reboot(&self) -> Result<(), HostError> {
        info!("Requesting host reboot");
        self.host
            .run(&HostCommand::new("systemd-run").args([
                "--unit",
                REBOOT_UNIT,
                "--description",
                "Reboot requested by the accelerator daemon",
                "/bin/sh",
                "-c",
                "systemctl stop kubelet.service; reboot",
            ]))
            .await?;
        Ok(())
    }
}
