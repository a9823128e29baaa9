//! Reconciliation of this node's `SriovFecNodeConfig`.
//!
//! Each pass refreshes the accelerator inventory, compares it with the spec
//! and, on drift, runs the kernel parameter check and the node configurator
//! inside the drain coordinator's critical section. The `Configured`
//! condition records the result:
//!
//! - `NotRequested`: spec lists no physical functions
//! - `InProgress`: configuration started (and stays so while a reboot is pending)
//! - `Succeeded` / `Failed`: the configurator's verdict
//! - `Unknown`: inventory, lease or drain failure

use crate::error::ControllerError;
use crate::store::NodeConfigStore;
use accelerator_host::{InventoryProbe, KernelController, NodeConfigurator};
use crds::{
    CONFIGURED_CONDITION, Condition, ConditionReason, ConditionStatus, SriovFecNodeConfig,
    SriovFecNodeConfigSpec, SriovFecNodeConfigStatus, find_condition, set_condition,
};
use futures::FutureExt;
use kube::ResourceExt;
use node_drain::CriticalSection;
use std::sync::Arc;
use telemetry::Outcome;
use tracing::{debug, error, info, warn};

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Host already matches the spec
    Steady,
    /// Only the reported inventory changed
    InventoryUpdated,
    /// Nothing requested; any leftover VFs were removed
    NotRequested,
    /// Host configured
    Applied,
    /// Kernel parameters staged and reboot requested
    RebootRequested,
}

impl From<ReconcileOutcome> for Outcome {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Steady | ReconcileOutcome::InventoryUpdated => Outcome::Steady,
            ReconcileOutcome::NotRequested | ReconcileOutcome::Applied => Outcome::Applied,
            ReconcileOutcome::RebootRequested => Outcome::Reboot,
        }
    }
}

/// Result of the work done while holding the lease.
enum WorkerOutcome {
    Configured,
    Reboot,
}

pub struct Reconciler {
    node_name: String,
    store: Arc<dyn NodeConfigStore>,
    probe: InventoryProbe,
    configurator: NodeConfigurator,
    kernel: KernelController,
    section: Arc<dyn CriticalSection>,
}

impl Reconciler {
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn NodeConfigStore>,
        probe: InventoryProbe,
        configurator: NodeConfigurator,
        kernel: KernelController,
        section: Arc<dyn CriticalSection>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            store,
            probe,
            configurator,
            kernel,
            section,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Creates this node's config with an empty spec if it does not exist yet.
    pub async fn ensure_node_config(&self) -> Result<(), ControllerError> {
        if self.store.get(&self.node_name).await?.is_some() {
            debug!("SriovFecNodeConfig {} already exists", self.node_name);
            return Ok(());
        }
        let inventory = self.probe.discover()?;
        let mut config = SriovFecNodeConfig::new(&self.node_name, SriovFecNodeConfigSpec::default());
        config.status = Some(SriovFecNodeConfigStatus {
            conditions: vec![Condition::new(
                CONFIGURED_CONDITION,
                ConditionStatus::False,
                ConditionReason::NotRequested,
                "",
                0,
            )],
            inventory,
        });
        self.store.create(&config).await?;
        info!("Created SriovFecNodeConfig {}", self.node_name);
        Ok(())
    }

    async fn set_configured(
        &self,
        status: &mut SriovFecNodeConfigStatus,
        condition_status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        generation: i64,
    ) -> Result<(), ControllerError> {
        let condition = Condition::new(CONFIGURED_CONDITION, condition_status, reason, message, generation);
        if set_condition(&mut status.conditions, condition) {
            self.store.update_status(&self.node_name, status).await?;
        }
        Ok(())
    }

    pub async fn reconcile(&self, config: &SriovFecNodeConfig) -> Result<ReconcileOutcome, ControllerError> {
        let name = config.name_any();
        if name != self.node_name {
            warn!("Ignoring SriovFecNodeConfig {} of another node", name);
            return Ok(ReconcileOutcome::Steady);
        }
        let generation = config.metadata.generation.unwrap_or_default();
        let mut status = config.status.clone().unwrap_or_default();

        let inventory = match self.probe.discover() {
            Ok(inventory) => inventory,
            Err(e) => {
                error!("Inventory query failed: {}", e);
                self.set_configured(
                    &mut status,
                    ConditionStatus::Unknown,
                    ConditionReason::Unknown,
                    e.to_string(),
                    generation,
                )
                .await?;
                return Err(e.into());
            }
        };
        if inventory != status.inventory {
            info!("Accelerator inventory of {} changed", name);
            status.inventory = inventory;
            self.store.update_status(&name, &status).await?;
            return Ok(ReconcileOutcome::InventoryUpdated);
        }

        let satisfied = config.spec.is_satisfied_by(&status.inventory);
        let observed = find_condition(&status.conditions, CONFIGURED_CONDITION).map(|c| c.observed_generation);
        if observed == Some(generation) && satisfied {
            debug!("SriovFecNodeConfig {} generation {} in sync", name, generation);
            return Ok(ReconcileOutcome::Steady);
        }

        if config.spec.physical_functions.is_empty() && satisfied {
            self.set_configured(
                &mut status,
                ConditionStatus::False,
                ConditionReason::NotRequested,
                "",
                generation,
            )
            .await?;
            return Ok(ReconcileOutcome::NotRequested);
        }

        info!("Configuring accelerators of {} for generation {}", name, generation);
        self.set_configured(
            &mut status,
            ConditionStatus::False,
            ConditionReason::InProgress,
            "",
            generation,
        )
        .await?;

        let mut result: Option<Result<WorkerOutcome, ControllerError>> = None;
        let worker = async {
            let outcome = self.configure(&config.spec).await;
            let uncordon = !matches!(outcome, Ok(WorkerOutcome::Reboot));
            result = Some(outcome);
            uncordon
        }
        .boxed();
        let section = self.section.run(config.spec.drain_skip, worker).await;

        match (section, result) {
            (Err(e), _) => {
                error!("Critical section failed: {}", e);
                self.set_configured(
                    &mut status,
                    ConditionStatus::Unknown,
                    ConditionReason::Unknown,
                    e.to_string(),
                    generation,
                )
                .await?;
                Err(e.into())
            }
            (Ok(()), None) => {
                self.set_configured(
                    &mut status,
                    ConditionStatus::Unknown,
                    ConditionReason::Unknown,
                    "configuration did not run",
                    generation,
                )
                .await?;
                Ok(ReconcileOutcome::Steady)
            }
            (Ok(()), Some(Ok(WorkerOutcome::Reboot))) => {
                info!("Reboot requested, leaving status untouched");
                Ok(ReconcileOutcome::RebootRequested)
            }
            (Ok(()), Some(Err(e))) => {
                error!("Configuration failed: {}", e);
                self.set_configured(
                    &mut status,
                    ConditionStatus::False,
                    ConditionReason::Failed,
                    e.to_string(),
                    generation,
                )
                .await?;
                Err(e)
            }
            (Ok(()), Some(Ok(WorkerOutcome::Configured))) => {
                status.inventory = self.probe.discover()?;
                if config.spec.physical_functions.is_empty() {
                    self.set_configured(
                        &mut status,
                        ConditionStatus::False,
                        ConditionReason::NotRequested,
                        "",
                        generation,
                    )
                    .await?;
                    return Ok(ReconcileOutcome::NotRequested);
                }
                self.set_configured(
                    &mut status,
                    ConditionStatus::True,
                    ConditionReason::Succeeded,
                    "Configured successfully",
                    generation,
                )
                .await?;
                Ok(ReconcileOutcome::Applied)
            }
        }
    }

    async fn configure(&self, spec: &SriovFecNodeConfigSpec) -> Result<WorkerOutcome, ControllerError> {
        if self.kernel.is_any_missing().await? {
            info!("IOMMU kernel parameters missing on {}", self.node_name);
            self.kernel.add_missing().await?;
            self.kernel.request_reboot().await?;
            return Ok(WorkerOutcome::Reboot);
        }
        self.configurator.apply(spec).await?;
        self.store.restart_device_plugin(&self.node_name).await?;
        Ok(WorkerOutcome::Configured)
    }
}
