//! Coalescing watch loop.
//!
//! Watches on every input kind only signal "something changed" into a
//! channel of capacity one; a single loop runs the whole-cluster reconcile
//! on those signals and on a fixed resync tick, so passes never overlap and
//! a burst of events costs one pass.

use crate::reconciler::ClusterReconciler;
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{Metrics, Outcome};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const CONTROLLER_NAME: &str = "cluster-config";

/// Quiet period letting related events land before a pass starts.
const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct Context {
    pub reconciler: ClusterReconciler,
    pub metrics: Metrics,
    pub resync_period: Duration,
}

/// Forwards every event of `api` as a change signal until the channel closes.
pub fn forward_changes<K>(kind: &'static str, api: Api<K>, config: watcher::Config, tx: mpsc::Sender<()>) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    tokio::spawn(async move {
        info!("Starting {} watcher", kind);
        let mut events = watcher(api, config).default_backoff().boxed();
        while let Some(event) = events.next().await {
            match event {
                Ok(_) => match tx.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                },
                Err(e) => warn!("{} watch error: {}", kind, e),
            }
        }
        info!("{} watcher stopped", kind);
    })
}

async fn reconcile_once(ctx: &Context) {
    let started = Instant::now();
    let outcome = match ctx.reconciler.reconcile().await {
        Ok(report) if report.changed() => {
            info!("Cluster reconcile applied changes: {:?}", report);
            Outcome::Applied
        }
        Ok(_) => {
            debug!("Cluster in sync");
            Outcome::Steady
        }
        Err(e) => {
            error!("Cluster reconcile failed: {}", e);
            Outcome::Error
        }
    };
    ctx.metrics.observe(CONTROLLER_NAME, outcome, started.elapsed());
}

/// Runs until every watcher has dropped its sender.
pub async fn run_reconcile_loop(ctx: Arc<Context>, mut changes: mpsc::Receiver<()>) {
    let mut resync = tokio::time::interval(ctx.resync_period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            change = changes.recv() => {
                if change.is_none() {
                    info!("All watchers stopped, leaving reconcile loop");
                    return;
                }
                tokio::time::sleep(DEBOUNCE).await;
                while changes.try_recv().is_ok() {}
            }
            _ = resync.tick() => debug!("Periodic resync"),
        }
        reconcile_once(&ctx).await;
    }
}
