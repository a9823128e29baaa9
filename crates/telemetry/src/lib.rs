//! Telemetry shared by the operator binaries
//!
//! - `init_tracing`: fmt subscriber filtered by `RUST_LOG` (default `info`)
//! - `Metrics`: reconcile counters and durations in a private registry
//! - `serve`: `/metrics`, `/healthz` and `/readyz` over axum

mod metrics;
mod server;

pub use metrics::{Metrics, Outcome};
pub use server::{Readiness, router, serve};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Default listen address for metrics and probes.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("metrics server error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics output is not UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Installs the global tracing subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
