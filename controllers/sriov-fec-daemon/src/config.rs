//! Daemon configuration from environment variables.

use crate::error::ControllerError;
use accelerator_host::configurator::DEFAULT_PF_BB_CONFIG;
use accelerator_host::whitelist::DEFAULT_DISCOVERY_CONFIG;
use node_drain::DrainConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_WORKDIR: &str = "/sriov_workdir";

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub namespace: String,
    pub resync_period: Duration,
    pub discovery_config: PathBuf,
    pub sysfs_root: PathBuf,
    pub host_root: PathBuf,
    /// Scratch directory for rendered `pf_bb_config` files
    pub workdir: PathBuf,
    pub pf_bb_config: String,
    pub metrics_addr: SocketAddr,
    pub drain: DrainConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_name = lookup("NODENAME")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("NODENAME environment variable is required".to_string())
            })?;
        let namespace = lookup("SRIOV_FEC_NAMESPACE")
            .or_else(|| lookup("NAMESPACE"))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "SRIOV_FEC_NAMESPACE or NAMESPACE environment variable is required".to_string(),
                )
            })?;

        let resync_period = match lookup("RESYNC_PERIOD_SECONDS") {
            None => DEFAULT_RESYNC_PERIOD,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!("Ignoring invalid RESYNC_PERIOD_SECONDS={:?}", raw);
                    DEFAULT_RESYNC_PERIOD
                }
            },
        };

        let metrics_raw =
            lookup("METRICS_ADDR").unwrap_or_else(|| telemetry::DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR {metrics_raw:?}: {e}")))?;

        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));

        Ok(Self {
            discovery_config: path("ACCELERATOR_DISCOVERY_CONFIG", DEFAULT_DISCOVERY_CONFIG),
            sysfs_root: path("SYSFS_ROOT", "/sys"),
            host_root: path("HOST_ROOT", "/host"),
            workdir: path("SRIOV_WORKDIR", DEFAULT_WORKDIR),
            pf_bb_config: lookup("PF_BB_CONFIG").unwrap_or_else(|| DEFAULT_PF_BB_CONFIG.to_string()),
            metrics_addr,
            resync_period,
            drain: DrainConfig::from_lookup(node_name.clone(), namespace.clone(), &lookup),
            node_name,
            namespace,
        })
    }
}
