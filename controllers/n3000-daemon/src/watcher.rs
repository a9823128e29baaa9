//! `N3000Node` watcher restricted to this node.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::N3000Node;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{Metrics, Outcome};
use tracing::{error, info};

const CONTROLLER_NAME: &str = "n3000-daemon";

pub struct Context {
    pub reconciler: Reconciler,
    pub metrics: Metrics,
    pub resync_period: Duration,
}

async fn reconcile(node: Arc<N3000Node>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let started = Instant::now();
    let result = ctx.reconciler.reconcile(&node).await;
    let outcome = result.as_ref().map_or(Outcome::Error, |o| Outcome::from(*o));
    ctx.metrics.observe(CONTROLLER_NAME, outcome, started.elapsed());
    result.map(|_| Action::requeue(ctx.resync_period))
}

fn error_policy(node: Arc<N3000Node>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    error!("Reconciliation error for N3000Node {:?}: {}", node.metadata.name, error);
    Action::requeue(ctx.resync_period)
}

pub async fn watch_n3000_node(api: Api<N3000Node>, ctx: Arc<Context>) -> Result<(), ControllerError> {
    let node_name = ctx.reconciler.node_name().to_string();
    info!("Starting N3000Node watcher for node {}", node_name);

    // Flashing takes tens of minutes; events arriving meanwhile collapse into one rerun
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(1);

    Controller::new(api, watcher::Config::default().fields(&format!("metadata.name={node_name}")))
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => info!("Reconciled N3000Node {}", obj.name),
                Err(e) => error!("Controller error for N3000Node: {}", e),
            }
        })
        .await;

    Ok(())
}
