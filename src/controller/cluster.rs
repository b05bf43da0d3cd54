//! BareMetalCluster reconciler
//!
//! BareMetalCluster is owned by a Cluster API Cluster. The reconciler walks
//! that one hop, honours the pause gate and then hands off to the
//! [`ClusterProvisioner`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::owner::{resolve_owner_cluster, Resolution};
use super::pause::is_paused;
use super::provision::{ClusterProvisioner, NoopProvisioner, ProvisionState};
use super::status::{
    apply_status, desired_status, record_failure, StatusWrite, FAILURE_OWNER_RESOLUTION,
    FAILURE_PROVISIONING,
};
use super::{InfraKind, Outcome, OwnerKind, Reconcile};
use crate::store::{ObjectKey, ObjectStore};
use crate::Error;

/// Reconciler for BareMetalCluster objects
pub struct BareMetalClusterReconciler {
    store: Arc<dyn ObjectStore>,
    provisioner: Arc<dyn ClusterProvisioner>,
}

impl BareMetalClusterReconciler {
    /// Create a reconciler with no provisioning backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            provisioner: Arc::new(NoopProvisioner),
        }
    }

    /// Use the given provisioning backend
    pub fn with_provisioner(mut self, provisioner: Arc<dyn ClusterProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }
}

#[async_trait]
impl Reconcile for BareMetalClusterReconciler {
    fn kind(&self) -> InfraKind {
        InfraKind::BareMetalCluster
    }

    #[instrument(skip(self, key), fields(kind = "BareMetalCluster", key = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, Error> {
        let store = self.store.as_ref();

        let Some(infra) = store.get_bare_metal_cluster(key).await? else {
            debug!("object no longer exists");
            return Ok(Outcome::Gone);
        };

        let owner_refs = infra.metadata.owner_references.as_deref().unwrap_or_default();
        let cluster = match resolve_owner_cluster(store, key, owner_refs).await {
            Ok(Resolution::Found(cluster)) => cluster,
            Ok(Resolution::NotSet) => {
                info!("Cluster controller has not yet set OwnerRef");
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

        let state = match self.provisioner.ensure(&infra, &cluster).await {
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
