//! Node Drain Coordinator
//!
//! Serializes disruptive node work across the cluster. A node agent wraps its
//! host reconfiguration in [`CriticalSection::run`]; the [`DrainCoordinator`]
//! takes a cluster-wide `coordination.k8s.io/v1` Lease so at most one node
//! does so at a time, cordons and drains the node first, and uncordons and
//! releases afterwards unless the work ended in a reboot request.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod drainer;
pub mod error;
pub mod lease;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use backoff::ExponentialBackoff;
pub use config::DrainConfig;
pub use coordinator::{CriticalSection, DrainCoordinator};
pub use drainer::{KubeNodeDrainer, NodeDrainer, pods_to_evict};
pub use error::DrainError;
pub use lease::{KubeLeaseStore, LeaderElector, LeaseRecord, LeaseStore, VersionedLease};

#[cfg(any(test, feature = "test-util"))]
pub use mock::{FakeNodeDrainer, InMemoryLeaseStore, PassthroughSection};
