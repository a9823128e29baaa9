//! Lease-guarded critical section
//!
//! `DrainCoordinator::run` acquires the shared lease, cordons and drains the
//! node, runs the caller's worker, then uncordons and releases. The worker
//! resolves to `true` when the node should be uncordoned afterwards; `false`
//! means a reboot is pending, so the node stays cordoned and the lease keeps
//! being renewed until the process goes down with the host.

use crate::backoff::ExponentialBackoff;
use crate::config::DrainConfig;
use crate::drainer::NodeDrainer;
use crate::error::DrainError;
use crate::lease::{LeaderElector, LeaseStore};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Runs disruptive work with the guarantees of the drain coordinator.
#[async_trait]
pub trait CriticalSection: Send + Sync {
    /// Runs `worker` while holding the lease, draining first unless
    /// `skip_drain` is set.
    async fn run<'a>(&'a self, skip_drain: bool, worker: BoxFuture<'a, bool>) -> Result<(), DrainError>;
}

pub struct DrainCoordinator {
    config: DrainConfig,
    elector: Arc<LeaderElector>,
    drainer: Arc<dyn NodeDrainer>,
    /// Renewal kept alive after a worker asked for a reboot
    held: Mutex<Option<JoinHandle<()>>>,
}

impl DrainCoordinator {
    pub fn new(config: DrainConfig, store: Arc<dyn LeaseStore>, drainer: Arc<dyn NodeDrainer>) -> Self {
        let elector = Arc::new(LeaderElector::new(
            store,
            config.node_name.clone(),
            config.lease_duration,
            config.renew_deadline,
            config.retry_period,
        ));
        Self {
            config,
            elector,
            drainer,
            held: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    fn stop_held_renewal(&self) {
        let held = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = held {
            handle.abort();
        }
    }

    async fn drain_with_backoff(&self) -> Result<(), DrainError> {
        let node = &self.config.node_name;
        let mut backoff = ExponentialBackoff::new(self.config.drain_backoff, 2, self.config.drain_attempts);
        loop {
            match self.drainer.drain(node, self.config.drain_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => match backoff.next_backoff() {
                    Some(wait) => {
                        warn!(
                            "Drain attempt {} of {} failed: {}; retrying in {:?}",
                            backoff.failures(),
                            self.config.drain_attempts,
                            e,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        return Err(DrainError::DrainFailed {
                            node: node.clone(),
                            reason: e.to_string(),
                        });
                    }
                },
            }
        }
    }

    async fn drain_and_work(
        &self,
        skip_drain: bool,
        worker: BoxFuture<'_, bool>,
        cordoned: &mut bool,
    ) -> Result<bool, DrainError> {
        if skip_drain {
            info!("Drain skipped for node {}", self.config.node_name);
        } else {
            self.drainer.cordon(&self.config.node_name).await?;
            *cordoned = true;
            self.drain_with_backoff().await?;
        }
        Ok(worker.await)
    }

    async fn uncordon_and_release(&self, cordoned: bool) -> Result<(), DrainError> {
        let uncordoned = if cordoned {
            self.drainer.uncordon(&self.config.node_name).await
        } else {
            Ok(())
        };
        if let Err(e) = self.elector.release().await {
            error!("Failed to release lease: {}", e);
        }
        uncordoned
    }
}

#[async_trait]
impl CriticalSection for DrainCoordinator {
    async fn run<'a>(&'a self, skip_drain: bool, worker: BoxFuture<'a, bool>) -> Result<(), DrainError> {
        self.stop_held_renewal();
        self.elector.acquire().await;

        let (lost_tx, mut lost_rx) = oneshot::channel::<()>();
        let elector = Arc::clone(&self.elector);
        let renewal = tokio::spawn(async move {
            elector.renew_until_lost().await;
            let _ = lost_tx.send(());
        });

        let mut cordoned = false;
        let outcome = tokio::select! {
            result = self.drain_and_work(skip_drain, worker, &mut cordoned) => result,
            _ = &mut lost_rx => Err(DrainError::LeaseLost),
        };

        match outcome {
            Ok(true) => {
                renewal.abort();
                self.uncordon_and_release(cordoned).await
            }
            Ok(false) => {
                info!(
                    "Node {} left cordoned with the lease held until reboot",
                    self.config.node_name
                );
                *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some(renewal);
                Ok(())
            }
            Err(e) => {
                renewal.abort();
                if let Err(uncordon) = self.uncordon_and_release(cordoned).await {
                    error!("Failed to uncordon after error: {}", uncordon);
                }
                Err(e)
            }
        }
    }
}
