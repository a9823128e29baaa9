//! Coordinator timing configuration
//!
//! Lease duration and drain timeout come from the environment. Malformed or
//! non-positive values fall back to the defaults with a warning.

use std::time::Duration;
use tracing::warn;

pub const DRAIN_TIMEOUT_ENV: &str = "DRAIN_TIMEOUT_SECONDS";
pub const LEASE_DURATION_ENV: &str = "LEASE_DURATION_SECONDS";

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(600);
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(15);
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Lease shared by every accelerator node agent in the namespace.
pub const DEFAULT_LEASE_NAME: &str = "intel-accelerator-drain-lease";

/// Settings for one node's `DrainCoordinator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Node to cordon and drain; also the lease holder identity
    pub node_name: String,
    /// Namespace holding the lease
    pub namespace: String,
    pub lease_name: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    /// Upper bound for evicted pods to terminate in one drain attempt
    pub drain_timeout: Duration,
    pub drain_attempts: u32,
    /// Wait after the first failed drain attempt; doubles each time
    pub drain_backoff: Duration,
}

impl DrainConfig {
    pub fn new(node_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: namespace.into(),
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            drain_attempts: 5,
            drain_backoff: Duration::from_secs(15),
        }
    }

    /// Reads the overridable timings through `lookup` (normally `std::env::var`).
    pub fn from_lookup<F>(node_name: impl Into<String>, namespace: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(node_name, namespace);
        config.drain_timeout = seconds(&lookup, DRAIN_TIMEOUT_ENV, DEFAULT_DRAIN_TIMEOUT);
        config.lease_duration = seconds(&lookup, LEASE_DURATION_ENV, DEFAULT_LEASE_DURATION);
        config
    }

    pub fn from_env(node_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::from_lookup(node_name, namespace, |key| std::env::var(key).ok())
    }
}

fn seconds<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            warn!(
                "Ignoring invalid {}={:?}, using {}s",
                key,
                raw,
                default.as_secs()
            );
            default
        }
    }
}
