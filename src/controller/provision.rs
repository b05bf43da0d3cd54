//! Provisioning hooks
//!
//! The reconcilers call these once every gate has passed. Implementations
//! talk to the bare-metal backend (power control, image deployment) and must
//! be idempotent: they run again on every reconcile of an unchanged object.

use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::crd::{BareMetalCluster, BareMetalMachine, Cluster, Machine};
use crate::Error;

/// Where the backend stands after an `ensure` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionState {
    /// Infrastructure matches the desired state
    Ready,
    /// Work has been started; check again later
    InProgress {
        /// How long to wait before checking again
        retry_after: Duration,
    },
}

/// Corrective action for a BareMetalCluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Converge the backend toward the cluster's desired state
    async fn ensure(
        &self,
        infra: &BareMetalCluster,
        cluster: &Cluster,
    ) -> Result<ProvisionState, Error>;
}

/// Corrective action for a BareMetalMachine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineProvisioner: Send + Sync {
    /// Converge the backend toward the machine's desired state
    async fn ensure(
        &self,
        infra: &BareMetalMachine,
        machine: &Machine,
        cluster: &Cluster,
    ) -> Result<ProvisionState, Error>;
}

/// Provisioner with no backend; everything is immediately ready
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl ClusterProvisioner for NoopProvisioner {
    async fn ensure(
        &self,
        _infra: &BareMetalCluster,
        _cluster: &Cluster,
    ) -> Result<ProvisionState, Error> {
        Ok(ProvisionState::Ready)
    }
}

#[async_trait]
impl MachineProvisioner for NoopProvisioner {
    async fn ensure(
        &self,
        _infra: &BareMetalMachine,
        _machine: &Machine,
        _cluster: &Cluster,
    ) -> Result<ProvisionState, Error> {
        Ok(ProvisionState::Ready)
    }
}
