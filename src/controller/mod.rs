//! Reconcilers for the bare-metal infrastructure kinds
//!
//! Each reconcile invocation re-fetches the infrastructure object, resolves
//! its owners through the store, evaluates the pause gate and only then runs
//! the provisioning hook. Earlier gates always short-circuit later ones.

mod cluster;
mod machine;
mod owner;
mod pause;
mod provision;
mod status;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::store::ObjectKey;
use crate::Error;

pub use cluster::BareMetalClusterReconciler;
pub use machine::BareMetalMachineReconciler;
pub use owner::{
    controller_owner_key, resolve_owner_cluster, resolve_owner_machine, Resolution,
};
pub use pause::{has_paused_annotation, is_paused, PAUSED_ANNOTATION};
pub use provision::{
    ClusterProvisioner, MachineProvisioner, NoopProvisioner, ProvisionState,
};
pub use status::{FAILURE_OWNER_RESOLUTION, FAILURE_PROVISIONING};

#[cfg(test)]
pub use provision::{MockClusterProvisioner, MockMachineProvisioner};

/// Shortest delay a reconcile may ask to be requeued after
pub const MIN_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Cluster API kinds that own infrastructure objects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    /// `cluster.x-k8s.io` Cluster
    Cluster,
    /// `cluster.x-k8s.io` Machine
    Machine,
}

impl OwnerKind {
    /// Kind name as it appears in owner references
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::Machine => "Machine",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infrastructure kinds reconciled by this provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InfraKind {
    /// BareMetalCluster, owned by a Cluster
    BareMetalCluster,
    /// BareMetalMachine, owned by a Machine which is owned by a Cluster
    BareMetalMachine,
}

impl InfraKind {
    /// Kind name of the infrastructure object
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BareMetalCluster => "BareMetalCluster",
            Self::BareMetalMachine => "BareMetalMachine",
        }
    }
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a reconcile that did not fail
///
/// Everything except [`Outcome::RequeueAfter`] is "done": the manager forgets
/// the key's backoff and waits for the next watch event or resync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The infrastructure object no longer exists
    Gone,
    /// The controller owner of the given kind is not set yet or not created yet
    OwnerNotSet(OwnerKind),
    /// Reconciliation is suspended for this object
    Paused,
    /// Status converged with the provisioning backend
    Reconciled,
    /// Provisioning still in progress; check again after the delay
    RequeueAfter(Duration),
}

impl Outcome {
    /// Requeue after `delay`, never sooner than [`MIN_REQUEUE_DELAY`]
    pub fn requeue_after(delay: Duration) -> Self {
        Self::RequeueAfter(delay.max(MIN_REQUEUE_DELAY))
    }

    /// Delay before the key should be processed again, if any
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            Self::RequeueAfter(delay) => Some(*delay),
            _ => None,
        }
    }

    /// Whether the key is settled until something else triggers it
    pub fn is_done(&self) -> bool {
        self.requeue_delay().is_none()
    }

    /// Short label for logs
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Gone => "Gone",
            Self::OwnerNotSet(_) => "OwnerNotSet",
            Self::Paused => "Paused",
            Self::Reconciled => "Reconciled",
            Self::RequeueAfter(_) => "RequeueAfter",
        }
    }
}

/// Common reconcile capability shared by the per-kind reconcilers
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Infrastructure kind this reconciler handles
    fn kind(&self) -> InfraKind;

    /// Drive the object identified by `key` toward its desired state
    ///
    /// Errors are retried by the manager with exponential backoff.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, Error>;
}
