//! Drain and lease errors

use thiserror::Error;

/// Errors from the critical-section coordinator.
#[derive(Debug, Error)]
pub enum DrainError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Lease could not be read or written
    #[error("lease error: {0}")]
    Lease(String),

    /// Renewal failed for longer than the renew deadline
    #[error("lease lost while running the critical section")]
    LeaseLost,

    /// Node could not be drained within the allowed attempts
    #[error("drain of node {node} failed: {reason}")]
    DrainFailed { node: String, reason: String },

    /// JSON (de)serialization of API objects failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
