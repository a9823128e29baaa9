//! Controller-specific error types.

use kube::Error as KubeError;
use telemetry::TelemetryError;
use thiserror::Error;

/// Errors that can occur in the cluster reconciler.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Some per-node writes failed; the affected configs carry the details
    #[error("{0} object(s) failed to sync")]
    Incomplete(usize),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}
