//! Lease-based leader election
//!
//! Follows the client-go resource lock rules on a
//! `coordination.k8s.io/v1` Lease: the lease is free when missing, when its
//! holder is empty, when we already hold it, or when
//! `renewTime + leaseDurationSeconds` is in the past. Every write carries the
//! observed `resourceVersion`, so two candidates racing for a free lease
//! cannot both win.

use crate::error::DrainError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::Api;
use kube::api::PostParams;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Holder fields of a Lease spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseRecord {
    pub holder_identity: Option<String>,
    pub lease_duration_seconds: i32,
    pub acquire_time: Option<DateTime<Utc>>,
    pub renew_time: Option<DateTime<Utc>>,
    pub lease_transitions: i32,
}

fn micro_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn as_i32(value: &Value) -> i32 {
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or_default()
}

impl LeaseRecord {
    /// Reads a record from the JSON form of a Lease spec.
    pub fn from_spec_json(spec: &Value) -> Self {
        Self {
            holder_identity: spec["holderIdentity"].as_str().map(str::to_string),
            lease_duration_seconds: as_i32(&spec["leaseDurationSeconds"]),
            acquire_time: parse_time(&spec["acquireTime"]),
            renew_time: parse_time(&spec["renewTime"]),
            lease_transitions: as_i32(&spec["leaseTransitions"]),
        }
    }

    pub fn to_spec_json(&self) -> Value {
        let mut spec = json!({
            "holderIdentity": self.holder_identity.clone().unwrap_or_default(),
            "leaseDurationSeconds": self.lease_duration_seconds,
            "leaseTransitions": self.lease_transitions,
        });
        if let Some(t) = &self.acquire_time {
            spec["acquireTime"] = json!(micro_time(t));
        }
        if let Some(t) = &self.renew_time {
            spec["renewTime"] = json!(micro_time(t));
        }
        spec
    }

    pub fn holder(&self) -> &str {
        self.holder_identity.as_deref().unwrap_or_default()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder() == identity
    }

    /// True once the holder stopped renewing for longer than the lease duration.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.renew_time {
            Some(renewed) => {
                renewed + chrono::Duration::seconds(i64::from(self.lease_duration_seconds)) < now
            }
            None => true,
        }
    }

    /// Whether `identity` may take or keep this lease at `now`.
    pub fn is_available_to(&self, identity: &str, now: DateTime<Utc>) -> bool {
        self.holder().is_empty() || self.is_held_by(identity) || self.is_expired(now)
    }
}

/// A record together with the `resourceVersion` it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedLease {
    pub record: LeaseRecord,
    pub resource_version: String,
}

/// Storage for a single named lease.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get(&self) -> Result<Option<VersionedLease>, DrainError>;

    /// Fails if the lease already exists.
    async fn create(&self, record: &LeaseRecord) -> Result<VersionedLease, DrainError>;

    /// Fails if the lease changed since `resource_version` was read.
    async fn update(
        &self,
        resource_version: &str,
        record: &LeaseRecord,
    ) -> Result<VersionedLease, DrainError>;
}

/// Lease store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeLeaseStore {
    api: Api<Lease>,
    name: String,
}

impl KubeLeaseStore {
    pub fn new(client: kube::Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }

    fn build(&self, resource_version: Option<&str>, record: &LeaseRecord) -> Result<Lease, DrainError> {
        let mut metadata = json!({ "name": self.name });
        if let Some(rv) = resource_version {
            metadata["resourceVersion"] = json!(rv);
        }
        Ok(serde_json::from_value(json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": metadata,
            "spec": record.to_spec_json(),
        }))?)
    }

    fn versioned(lease: &Lease) -> Result<VersionedLease, DrainError> {
        let spec = serde_json::to_value(&lease.spec)?;
        Ok(VersionedLease {
            record: LeaseRecord::from_spec_json(&spec),
            resource_version: lease.metadata.resource_version.clone().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(&self) -> Result<Option<VersionedLease>, DrainError> {
        match self.api.get_opt(&self.name).await? {
            Some(lease) => Ok(Some(Self::versioned(&lease)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, record: &LeaseRecord) -> Result<VersionedLease, DrainError> {
        let lease = self.build(None, record)?;
        let created = self.api.create(&PostParams::default(), &lease).await?;
        Self::versioned(&created)
    }

    async fn update(
        &self,
        resource_version: &str,
        record: &LeaseRecord,
    ) -> Result<VersionedLease, DrainError> {
        let lease = self.build(Some(resource_version), record)?;
        let replaced = self
            .api
            .replace(&self.name, &PostParams::default(), &lease)
            .await?;
        Self::versioned(&replaced)
    }
}

/// Acquires, renews and releases one lease for one identity.
pub struct LeaderElector {
    store: Arc<dyn LeaseStore>,
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl LeaderElector {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        identity: impl Into<String>,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        Self {
            store,
            identity: identity.into(),
            lease_duration,
            renew_deadline,
            retry_period,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn duration_seconds(&self) -> i32 {
        i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)
    }

    /// One acquisition or renewal attempt.
    ///
    /// Returns false when someone else holds a live lease or when a
    /// concurrent writer won the race.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, DrainError> {
        let now = Utc::now();
        let Some(current) = self.store.get().await? else {
            let record = LeaseRecord {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: self.duration_seconds(),
                acquire_time: Some(now),
                renew_time: Some(now),
                lease_transitions: 0,
            };
            return Ok(match self.store.create(&record).await {
                Ok(_) => true,
                Err(e) => {
                    debug!("Lease create by {} lost the race: {}", self.identity, e);
                    false
                }
            });
        };

        let old = &current.record;
        if !old.is_available_to(&self.identity, now) {
            debug!("Lease held by {}", old.holder());
            return Ok(false);
        }

        let renewing = old.is_held_by(&self.identity);
        let record = LeaseRecord {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: self.duration_seconds(),
            acquire_time: if renewing { old.acquire_time.or(Some(now)) } else { Some(now) },
            renew_time: Some(now),
            lease_transitions: if renewing {
                old.lease_transitions
            } else {
                old.lease_transitions.saturating_add(1)
            },
        };
        Ok(match self.store.update(&current.resource_version, &record).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Lease update by {} rejected: {}", self.identity, e);
                false
            }
        })
    }

    /// Blocks until the lease is ours, retrying every retry period.
    pub async fn acquire(&self) {
        info!("Waiting for lease as {}", self.identity);
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!("Lease acquired by {}", self.identity);
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!("Lease acquisition attempt failed: {}", e),
            }
            tokio::time::sleep(self.retry_period).await;
        }
    }

    /// Renews every retry period; returns once renewal has failed for longer
    /// than the renew deadline.
    pub async fn renew_until_lost(&self) {
        let mut last_renewed = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(self.retry_period).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewed = tokio::time::Instant::now(),
                Ok(false) => debug!("Lease renewal by {} refused", self.identity),
                Err(e) => warn!("Lease renewal failed: {}", e),
            }
            if last_renewed.elapsed() > self.renew_deadline {
                warn!("Lease lost by {}", self.identity);
                return;
            }
        }
    }

    /// Hands the lease back by clearing the holder.
    pub async fn release(&self) -> Result<(), DrainError> {
        let Some(current) = self.store.get().await? else {
            return Ok(());
        };
        if !current.record.is_held_by(&self.identity) {
            return Ok(());
        }
        let record = LeaseRecord {
            holder_identity: Some(String::new()),
            lease_duration_seconds: 1,
            renew_time: Some(Utc::now()),
            ..current.record
        };
        self.store
            .update(&current.resource_version, &record)
            .await
            .map_err(|e| DrainError::Lease(format!("release by {}: {e}", self.identity)))?;
        info!("Lease released by {}", self.identity);
        Ok(())
    }
}
