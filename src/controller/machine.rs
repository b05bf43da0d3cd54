//! BareMetalMachine reconciler
//!
//! A BareMetalMachine is controlled by a Machine, which is controlled by a
//! Cluster. Both hops are resolved on every reconcile. The Cluster is only
//! used for the pause gate and as context for the provisioning hook.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::owner::{resolve_owner_cluster, resolve_owner_machine, Resolution};
use super::pause::is_paused;
use super::provision::{MachineProvisioner, NoopProvisioner, ProvisionState};
use super::status::{
    apply_status, desired_status, record_failure, StatusWrite, FAILURE_OWNER_RESOLUTION,
    FAILURE_PROVISIONING,
};
use super::{InfraKind, Outcome, OwnerKind, Reconcile};
use crate::store::{ObjectKey, ObjectStore};
use crate::Error;

/// Reconciler for BareMetalMachine objects
pub struct BareMetalMachineReconciler {
    store: Arc<dyn ObjectStore>,
    provisioner: Arc<dyn MachineProvisioner>,
}

impl BareMetalMachineReconciler {
    /// Create a reconciler with no provisioning backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            provisioner: Arc::new(NoopProvisioner),
        }
    }

    /// Use the given provisioning backend
    pub fn with_provisioner(mut self, provisioner: Arc<dyn MachineProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }
}

#[async_trait]
impl Reconcile for BareMetalMachineReconciler {
    fn kind(&self) -> InfraKind {
        InfraKind::BareMetalMachine
    }

    #[instrument(skip(self, key), fields(kind = "BareMetalMachine", key = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, Error> {
        let store = self.store.as_ref();

        let Some(infra) = store.get_bare_metal_machine(key).await? else {
            debug!("object no longer exists");
            return Ok(Outcome::Gone);
        };

        let owner_refs = infra.metadata.owner_references.as_deref().unwrap_or_default();
        let machine = match resolve_owner_machine(store, key, owner_refs).await {
            Ok(Resolution::Found(machine)) => machine,
            Ok(Resolution::NotSet) => {
                info!("Machine controller has not yet set OwnerRef");
                return Ok(Outcome::OwnerNotSet(OwnerKind::Machine));
            }
            Err(e) => {
                record_failure(store, &infra, FAILURE_OWNER_RESOLUTION, &e).await;
                return Err(e);
            }
        };

        let machine_key = key.sibling(machine.metadata.name.clone().unwrap_or_default());
        let machine_refs = machine.metadata.owner_references.as_deref().unwrap_or_default();
        let cluster = match resolve_owner_cluster(store, &machine_key, machine_refs).await {
            Ok(Resolution::Found(cluster)) => cluster,
            Ok(Resolution::NotSet) => {
                info!(machine = %machine_key, "Machine is missing cluster owner");
                return Ok(Outcome::OwnerNotSet(OwnerKind::Cluster));
            }
            Err(e) => {
                record_failure(store, &infra, FAILURE_OWNER_RESOLUTION, &e).await;
                return Err(e);
            }
        };

        if is_paused(&cluster, &infra.metadata) {
            info!(cluster = ?cluster.metadata.name, "reconciliation is paused for this object");
            return Ok(Outcome::Paused);
        }

        let state = match self.provisioner.ensure(&infra, &machine, &cluster).await {
            Ok(state) => state,
            Err(e) => {
                record_failure(store, &infra, FAILURE_PROVISIONING, &e).await;
                return Err(e);
            }
        };

        let desired = desired_status(&infra, &state);
        if apply_status(store, &infra, desired).await? == StatusWrite::Gone {
            debug!("object deleted during status write");
            return Ok(Outcome::Gone);
        }

        Ok(match state {
            ProvisionState::Ready => Outcome::Reconciled,
            ProvisionState::InProgress { retry_after } => Outcome::requeue_after(retry_after),
        })
    }
}
