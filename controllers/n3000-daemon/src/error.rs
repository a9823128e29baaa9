//! Controller-specific error types.

use accelerator_host::HostError;
use kube::Error as KubeError;
use node_drain::DrainError;
use telemetry::TelemetryError;
use thiserror::Error;

/// Errors that can occur in the N3000 node daemon.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Download, flashing or inventory failed
    #[error("{0}")]
    Host(#[from] HostError),

    /// Lease or drain failed
    #[error("{0}")]
    Drain(#[from] DrainError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}
