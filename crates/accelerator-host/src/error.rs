//! Host operation errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while probing or configuring the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Filesystem access failed (sysfs, host files, workdir)
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External command could not be started
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External command exited non-zero
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// External command did not finish in time
    #[error("{command} timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    /// Accelerator discovery config could not be parsed
    #[error("invalid accelerator discovery config {path}: {source}")]
    Whitelist {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Requested configuration cannot be applied
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Queue configuration rejected by the admission rules
    #[error("invalid bbDevConfig for {pci_address}: {source}")]
    InvalidBBDevConfig {
        pci_address: String,
        #[source]
        source: crds::ValidationError,
    },

    #[error("driver {0} does not support setting the number of VFs")]
    UnsupportedDriver(String),

    #[error("accelerator {0} not found in inventory")]
    AcceleratorNotFound(String),

    #[error("unsupported OS: {0}")]
    UnsupportedOs(String),

    /// Tool output or host file did not have the expected shape
    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("firmware update failed: {0}")]
    FirmwareUpdate(String),
}

impl HostError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            what,
            detail: detail.into(),
        }
    }
}
