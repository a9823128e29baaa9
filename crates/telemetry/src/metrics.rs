use crate::TelemetryError;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::time::Duration;

// Reconciles that touch hardware can run for many minutes
const RECONCILE_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0];

/// How a reconcile ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to change
    Steady,
    /// Changes applied
    Applied,
    /// Host reboot requested
    Reboot,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Steady => "steady",
            Self::Applied => "applied",
            Self::Reboot => "reboot",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconcile metrics, labelled by controller and outcome.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let reconciles = IntCounterVec::new(
            Opts::new("accelerator_reconcile_total", "Reconciles by controller and outcome"),
            &["controller", "outcome"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "accelerator_reconcile_duration_seconds",
                "Reconcile duration by controller",
            )
            .buckets(RECONCILE_DURATION_BUCKETS.to_vec()),
            &["controller"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        Ok(Self {
            registry,
            reconciles,
            reconcile_duration,
        })
    }

    pub fn observe(&self, controller: &str, outcome: Outcome, elapsed: Duration) {
        self.reconciles
            .with_label_values(&[controller, outcome.as_str()])
            .inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    pub fn reconcile_count(&self, controller: &str, outcome: Outcome) -> u64 {
        self.reconciles
            .with_label_values(&[controller, outcome.as_str()])
            .get()
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_by_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("sriov-fec-daemon", Outcome::Applied, Duration::from_secs(3));
        metrics.observe("sriov-fec-daemon", Outcome::Steady, Duration::from_millis(5));
        metrics.observe("sriov-fec-daemon", Outcome::Steady, Duration::from_millis(7));

        assert_eq!(metrics.reconcile_count("sriov-fec-daemon", Outcome::Steady), 2);
        assert_eq!(metrics.reconcile_count("sriov-fec-daemon", Outcome::Applied), 1);
        assert_eq!(metrics.reconcile_count("sriov-fec-daemon", Outcome::Error), 0);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("cluster-config", Outcome::Error, Duration::from_secs(1));

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"accelerator_reconcile_total{controller="cluster-config",outcome="error"} 1"#
        ));
        assert!(text.contains("accelerator_reconcile_duration_seconds_bucket"));
    }
}
