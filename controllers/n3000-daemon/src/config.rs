//! Daemon configuration from environment variables.

use crate::error::ControllerError;
use node_drain::DrainConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_WORKDIR: &str = "/n3000-workdir";
/// nvmupdate package shipped in the daemon image, used for inventory runs
pub const DEFAULT_NVMUPDATE_PACKAGE: &str = "/nvmupdate";
/// Next to the SR-IOV FEC daemon, which listens on the telemetry default
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8081";

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub namespace: String,
    pub resync_period: Duration,
    pub host_root: PathBuf,
    /// Downloaded images and extracted firmware packages
    pub workdir: PathBuf,
    pub nvmupdate_package: PathBuf,
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
        let namespace = lookup("NAMESPACE").filter(|v| !v.is_empty()).ok_or_else(|| {
            ControllerError::InvalidConfig("NAMESPACE environment variable is required".to_string())
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

        let metrics_raw = lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR {metrics_raw:?}: {e}")))?;

        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));

        Ok(Self {
            host_root: path("HOST_ROOT", "/host"),
            workdir: path("N3000_WORKDIR", DEFAULT_WORKDIR),
            nvmupdate_package: path("NVMUPDATE_PACKAGE", DEFAULT_NVMUPDATE_PACKAGE),
            metrics_addr,
            resync_period,
            drain: DrainConfig::from_lookup(node_name.clone(), namespace.clone(), &lookup),
            node_name,
            namespace,
        })
    }
}
