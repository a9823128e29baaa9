//! Reconciliation of this node's `N3000Node`.
//!
//! Reports the FPGA and Fortville inventory and, when a new generation asks
//! for firmware, downloads every artifact, then flashes the cards inside the
//! drain coordinator's critical section. Progress is tracked in the
//! `Flashed` condition.

use crate::error::ControllerError;
use crate::store::N3000NodeStore;
use accelerator_host::KernelController;
use accelerator_host::n3000::{FirmwareFetcher, FortvilleManager, FpgaManager};
use crds::{
    Condition, ConditionReason, ConditionStatus, FLASHED_CONDITION, N3000FortvilleStatus, N3000FpgaStatus,
    N3000Node, N3000NodeSpec, N3000NodeStatus, find_condition, set_condition,
};
use futures::FutureExt;
use kube::ResourceExt;
use node_drain::CriticalSection;
use std::path::PathBuf;
use std::sync::Arc;
use telemetry::Outcome;
use tracing::{debug, error, info, warn};

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Steady,
    InventoryUpdated,
    NotRequested,
    Flashed,
    RebootRequested,
}

impl From<ReconcileOutcome> for Outcome {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Steady | ReconcileOutcome::InventoryUpdated => Outcome::Steady,
            ReconcileOutcome::NotRequested | ReconcileOutcome::Flashed => Outcome::Applied,
            ReconcileOutcome::RebootRequested => Outcome::Reboot,
        }
    }
}

enum WorkerOutcome {
    Flashed,
    Reboot,
}

/// Firmware tooling of one node.
#[derive(Clone)]
pub struct N3000Host {
    pub fpga: FpgaManager,
    pub fortville: FortvilleManager,
    pub fetcher: Arc<dyn FirmwareFetcher>,
    pub kernel: KernelController,
}

pub struct Reconciler {
    node_name: String,
    store: Arc<dyn N3000NodeStore>,
    host: N3000Host,
    section: Arc<dyn CriticalSection>,
}

impl Reconciler {
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn N3000NodeStore>,
        host: N3000Host,
        section: Arc<dyn CriticalSection>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            store,
            host,
            section,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn inventory(&self) -> Result<(Vec<N3000FpgaStatus>, Vec<N3000FortvilleStatus>), ControllerError> {
        let fpga = self.host.fpga.inventory().await?;
        let fortville = self.host.fortville.inventory().await?;
        Ok((fpga, fortville))
    }

    /// Creates this node's `N3000Node` with an empty spec if it does not exist yet.
    pub async fn ensure_node(&self) -> Result<(), ControllerError> {
        if self.store.get(&self.node_name).await?.is_some() {
            debug!("N3000Node {} already exists", self.node_name);
            return Ok(());
        }
        let (fpga, fortville) = self.inventory().await?;
        let mut node = N3000Node::new(&self.node_name, N3000NodeSpec::default());
        node.status = Some(N3000NodeStatus {
            conditions: vec![Condition::new(
                FLASHED_CONDITION,
                ConditionStatus::False,
                ConditionReason::NotRequested,
                "",
                0,
            )],
            fpga,
            fortville,
        });
        self.store.create(&node).await?;
        info!("Created N3000Node {}", self.node_name);
        Ok(())
    }

    async fn set_flashed(
        &self,
        status: &mut N3000NodeStatus,
        condition_status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        generation: i64,
    ) -> Result<(), ControllerError> {
        let condition = Condition::new(FLASHED_CONDITION, condition_status, reason, message, generation);
        if set_condition(&mut status.conditions, condition) {
            self.store.update_status(&self.node_name, status).await?;
        }
        Ok(())
    }

    pub async fn reconcile(&self, node: &N3000Node) -> Result<ReconcileOutcome, ControllerError> {
        let name = node.name_any();
        if name != self.node_name {
            warn!("Ignoring N3000Node {} of another node", name);
            return Ok(ReconcileOutcome::Steady);
        }
        let generation = node.metadata.generation.unwrap_or_default();
        let mut status = node.status.clone().unwrap_or_default();

        let (fpga, fortville) = match self.inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                error!("N3000 inventory failed: {}", e);
                self.set_flashed(
                    &mut status,
                    ConditionStatus::Unknown,
                    ConditionReason::Unknown,
                    e.to_string(),
                    generation,
                )
                .await?;
                return Err(e);
            }
        };
        if fpga != status.fpga || fortville != status.fortville {
            info!("N3000 inventory of {} changed", name);
            status.fpga = fpga;
            status.fortville = fortville;
            self.store.update_status(&name, &status).await?;
            return Ok(ReconcileOutcome::InventoryUpdated);
        }

        let observed = find_condition(&status.conditions, FLASHED_CONDITION).map(|c| c.observed_generation);
        if observed == Some(generation) {
            debug!("N3000Node {} generation {} already handled", name, generation);
            return Ok(ReconcileOutcome::Steady);
        }

        if node.spec.is_empty() {
            self.set_flashed(
                &mut status,
                ConditionStatus::False,
                ConditionReason::NotRequested,
                "",
                generation,
            )
            .await?;
            return Ok(ReconcileOutcome::NotRequested);
        }

        info!("Flashing N3000 firmware on {} for generation {}", name, generation);
        self.set_flashed(
            &mut status,
            ConditionStatus::False,
            ConditionReason::InProgress,
            "",
            generation,
        )
        .await?;

        let mut result: Option<Result<WorkerOutcome, ControllerError>> = None;
        let worker = async {
            let outcome = self.flash(&node.spec).await;
            let uncordon = !matches!(outcome, Ok(WorkerOutcome::Reboot));
            result = Some(outcome);
            uncordon
        }
        .boxed();
        let section = self.section.run(node.spec.drain_skip, worker).await;

        match (section, result) {
            (Err(e), _) => {
                error!("Critical section failed: {}", e);
                self.set_flashed(
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
                self.set_flashed(
                    &mut status,
                    ConditionStatus::Unknown,
                    ConditionReason::Unknown,
                    "flashing did not run",
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
                error!("Flashing failed: {}", e);
                self.set_flashed(
                    &mut status,
                    ConditionStatus::False,
                    ConditionReason::Failed,
                    e.to_string(),
                    generation,
                )
                .await?;
                Err(e)
            }
            (Ok(()), Some(Ok(WorkerOutcome::Flashed))) => {
                let (fpga, fortville) = self.inventory().await?;
                status.fpga = fpga;
                status.fortville = fortville;
                self.set_flashed(
                    &mut status,
                    ConditionStatus::True,
                    ConditionReason::Succeeded,
                    "Flashed successfully",
                    generation,
                )
                .await?;
                Ok(ReconcileOutcome::Flashed)
            }
        }
    }

    async fn flash(&self, spec: &N3000NodeSpec) -> Result<WorkerOutcome, ControllerError> {
        let mut downloads = Vec::new();
        let result = self.flash_with(spec, &mut downloads).await;
        for path in downloads {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        result
    }

    /// Nothing is written to flash until every artifact has been fetched and verified.
    async fn flash_with(
        &self,
        spec: &N3000NodeSpec,
        downloads: &mut Vec<PathBuf>,
    ) -> Result<WorkerOutcome, ControllerError> {
        let mut images = Vec::with_capacity(spec.fpga.len());
        for fpga in &spec.fpga {
            let image = self.host.fetcher.fetch(&fpga.user_image_url, &fpga.checksum).await?;
            downloads.push(image.clone());
            images.push((fpga.pci_addr.as_str(), image));
        }
        let package = match &spec.fortville {
            Some(fortville) => {
                let package = self
                    .host
                    .fetcher
                    .fetch(&fortville.firmware_url, &fortville.checksum)
                    .await?;
                downloads.push(package.clone());
                Some((fortville, package))
            }
            None => None,
        };

        for (pci_addr, image) in &images {
            self.host.fpga.program_user_image(image, pci_addr).await?;
            self.host.fpga.reload(pci_addr).await?;
        }

        let mut restart_required = false;
        if let Some((fortville, package)) = &package {
            restart_required = self.host.fortville.update(package, &fortville.macs).await?;
        }

        if restart_required {
            info!("Fortville firmware needs a restart of {}", self.node_name);
            self.host.kernel.request_reboot().await?;
            return Ok(WorkerOutcome::Reboot);
        }
        Ok(WorkerOutcome::Flashed)
    }
}
