//! Watch on this node's `SriovFecNodeConfig`.
//!
//! Uses `kube_runtime::Controller` restricted to `metadata.name=<node>`, so
//! every event, including status-only changes, lands on the same object and
//! reconciles never overlap.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::SriovFecNodeConfig;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{Metrics, Outcome};
use tracing::{debug, error, info};

const CONTROLLER_NAME: &str = "sriov-fec-daemon";

/// Shared state handed to every reconcile.
pub struct Context {
    pub reconciler: Reconciler,
    pub metrics: Metrics,
    pub resync_period: Duration,
}

async fn reconcile(config: Arc<SriovFecNodeConfig>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let started = Instant::now();
    let result = ctx.reconciler.reconcile(&config).await;
    let outcome = match &result {
        Ok(outcome) => {
            debug!("Reconcile finished: {:?}", outcome);
            Outcome::from(*outcome)
        }
        Err(_) => Outcome::Error,
    };
    ctx.metrics.observe(CONTROLLER_NAME, outcome, started.elapsed());
    result.map(|_| Action::requeue(ctx.resync_period))
}

fn error_policy(config: Arc<SriovFecNodeConfig>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for SriovFecNodeConfig {:?}: {}",
        config.metadata.name, error
    );
    Action::requeue(ctx.resync_period)
}

/// Runs until the watch stream ends.
pub async fn watch_node_config(api: Api<SriovFecNodeConfig>, ctx: Arc<Context>) -> Result<(), ControllerError> {
    let node_name = ctx.reconciler.node_name().to_string();
    info!("Starting SriovFecNodeConfig watcher for node {}", node_name);

    let watcher_config = watcher::Config::default().fields(&format!("metadata.name={node_name}"));
    // one object, one reconcile at a time
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(1);

    Controller::new(api, watcher_config)
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for SriovFecNodeConfig: {}", e);
            }
        })
        .await;

    Ok(())
}
