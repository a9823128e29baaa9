//! In-memory doubles for the lease store, the drainer and the critical section

use crate::coordinator::CriticalSection;
use crate::drainer::NodeDrainer;
use crate::error::DrainError;
use crate::lease::{LeaseRecord, LeaseStore, VersionedLease};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct LeaseState {
    lease: Option<VersionedLease>,
    version: u64,
    fail_updates: bool,
}

/// Lease store with API-server style optimistic concurrency.
///
/// Clones share the same lease.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    state: Arc<Mutex<LeaseState>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> Option<LeaseRecord> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.lease.as_ref().map(|l| l.record.clone())
    }

    /// Makes every following update fail, as if the API server were unreachable.
    pub fn fail_updates(&self, fail: bool) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_updates = fail;
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get(&self) -> Result<Option<VersionedLease>, DrainError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lease
            .clone())
    }

    async fn create(&self, record: &LeaseRecord) -> Result<VersionedLease, DrainError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.lease.is_some() {
            return Err(DrainError::Lease("lease already exists".to_string()));
        }
        state.version += 1;
        let lease = VersionedLease {
            record: record.clone(),
            resource_version: state.version.to_string(),
        };
        state.lease = Some(lease.clone());
        Ok(lease)
    }

    async fn update(
        &self,
        resource_version: &str,
        record: &LeaseRecord,
    ) -> Result<VersionedLease, DrainError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail_updates {
            return Err(DrainError::Lease("update unavailable".to_string()));
        }
        match &state.lease {
            Some(current) if current.resource_version == resource_version => {}
            Some(_) => return Err(DrainError::Lease("resourceVersion conflict".to_string())),
            None => return Err(DrainError::Lease("lease not found".to_string())),
        }
        state.version += 1;
        let lease = VersionedLease {
            record: record.clone(),
            resource_version: state.version.to_string(),
        };
        state.lease = Some(lease.clone());
        Ok(lease)
    }
}

#[derive(Debug, Default)]
struct DrainerState {
    calls: Vec<String>,
    failing_drains: usize,
}

/// Records cordon/drain/uncordon calls; drains can be scripted to fail.
#[derive(Debug, Clone, Default)]
pub struct FakeNodeDrainer {
    state: Arc<Mutex<DrainerState>>,
}

impl FakeNodeDrainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` drains fail.
    pub fn fail_drains(&self, count: usize) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failing_drains = count;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    fn record(&self, call: String) -> Result<(), DrainError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl NodeDrainer for FakeNodeDrainer {
    async fn cordon(&self, node: &str) -> Result<(), DrainError> {
        self.record(format!("cordon {node}"))
    }

    async fn drain(&self, node: &str, _timeout: Duration) -> Result<(), DrainError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(format!("drain {node}"));
        if state.failing_drains > 0 {
            state.failing_drains -= 1;
            return Err(DrainError::DrainFailed {
                node: node.to_string(),
                reason: "eviction refused".to_string(),
            });
        }
        Ok(())
    }

    async fn uncordon(&self, node: &str) -> Result<(), DrainError> {
        self.record(format!("uncordon {node}"))
    }
}

/// Runs the worker inline, without lease or drain.
#[derive(Debug, Clone, Default)]
pub struct PassthroughSection {
    runs: Arc<AtomicUsize>,
    refuse: bool,
}

impl PassthroughSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// A section that never runs the worker and reports a failed drain.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Number of times `run` was entered.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CriticalSection for PassthroughSection {
    async fn run<'a>(&'a self, _skip_drain: bool, worker: BoxFuture<'a, bool>) -> Result<(), DrainError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(DrainError::DrainFailed {
                node: "test-node".to_string(),
                reason: "drain refused".to_string(),
            });
        }
        worker.await;
        Ok(())
    }
}
