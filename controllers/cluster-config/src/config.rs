//! Controller configuration from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    /// Legacy single-config mode: only this `SriovFecClusterConfig` is applied
    pub honored_cluster_config: Option<String>,
    pub resync_period: Duration,
    pub metrics_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE")
            .or_else(|| lookup("NAMESPACE"))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "WATCH_NAMESPACE or NAMESPACE environment variable is required".to_string(),
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

        Ok(Self {
            namespace,
            honored_cluster_config: lookup("HONORED_CLUSTER_CONFIG").filter(|v| !v.trim().is_empty()),
            resync_period,
            metrics_addr,
        })
    }
}
