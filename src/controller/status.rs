//! Status computation and compare-and-swap status writes

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::ProvisionState;
use crate::crd::{BareMetalCluster, BareMetalMachine, InfrastructureObject, InfrastructureStatus};
use crate::store::ObjectStore;
use crate::Error;

/// Ready-condition reason while owners cannot be resolved
pub const FAILURE_OWNER_RESOLUTION: &str = "OwnerResolutionFailed";

/// Ready-condition reason when the provisioning hook fails
pub const FAILURE_PROVISIONING: &str = "ProvisioningFailed";

const REASON_PROVISIONED: &str = "Provisioned";
const REASON_PROVISIONING: &str = "Provisioning";

/// Infrastructure objects the store can write status for
#[async_trait]
pub(crate) trait StatusTarget: InfrastructureObject {
    async fn write_status(store: &dyn ObjectStore, object: &Self) -> Result<Self, Error>;
}

#[async_trait]
impl StatusTarget for BareMetalCluster {
    async fn write_status(store: &dyn ObjectStore, object: &Self) -> Result<Self, Error> {
        store.update_bare_metal_cluster_status(object).await
    }
}

#[async_trait]
impl StatusTarget for BareMetalMachine {
    async fn write_status(store: &dyn ObjectStore, object: &Self) -> Result<Self, Error> {
        store.update_bare_metal_machine_status(object).await
    }
}

/// What a status write did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StatusWrite {
    /// Desired status already recorded; nothing written
    Unchanged,
    /// Status written
    Written,
    /// Object deleted before the write landed
    Gone,
}

/// Status after the provisioning hook reported `state`
pub(crate) fn desired_status<K: InfrastructureObject>(
    object: &K,
    state: &ProvisionState,
) -> InfrastructureStatus {
    let (ready, reason) = match state {
        ProvisionState::Ready => (true, REASON_PROVISIONED),
        ProvisionState::InProgress { .. } => (false, REASON_PROVISIONING),
    };
    object
        .status_block()
        .cloned()
        .unwrap_or_default()
        .ready(ready, reason, object.meta().generation)
}

/// Write `desired` if it differs from the fetched status
///
/// The write carries the fetched resource version, so a concurrent update
/// turns into [`Error::Conflict`].
pub(crate) async fn apply_status<K: StatusTarget>(
    store: &dyn ObjectStore,
    object: &K,
    desired: InfrastructureStatus,
) -> Result<StatusWrite, Error> {
    if object.status_block() == Some(&desired) {
        return Ok(StatusWrite::Unchanged);
    }

    let mut updated = object.clone();
    updated.set_status_block(Some(desired));
    match K::write_status(store, &updated).await {
        Ok(_) => {
            debug!(kind = K::KIND, name = %object.name_any(), "status updated");
            Ok(StatusWrite::Written)
        }
        Err(e) if e.is_not_found() => Ok(StatusWrite::Gone),
        Err(e) => Err(e),
    }
}

/// Best-effort record of a failure on the object's Ready condition
///
/// The caller still returns the original error; a failure here is only logged.
pub(crate) async fn record_failure<K: StatusTarget>(
    store: &dyn ObjectStore,
    object: &K,
    reason: &str,
    error: &Error,
) {
    let desired = object
        .status_block()
        .cloned()
        .unwrap_or_default()
        .failed(reason, error.to_string());

    if let Err(e) = apply_status(store, object, desired).await {
        warn!(
            kind = K::KIND,
            name = %object.name_any(),
            error = %e,
            "failed to record failure in status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BareMetalMachineSpec, ConditionStatus};
    use crate::store::MockObjectStore;
    use std::time::Duration;

    fn machine() -> BareMetalMachine {
        let mut bmm = BareMetalMachine::new("node-1", BareMetalMachineSpec::default());
        bmm.metadata.namespace = Some("ns".to_string());
        bmm.metadata.generation = Some(4);
        bmm.metadata.resource_version = Some("7".to_string());
        bmm
    }

    #[test]
    fn ready_backend_yields_ready_status_for_current_generation() {
        let status = desired_status(&machine(), &ProvisionState::Ready);
        assert!(status.ready);
        assert_eq!(status.observed_generation, Some(4));
        let ready = status.ready_condition().expect("ready");
        assert_eq!(ready.status, ConditionStatus::True);
    }

    #[test]
    fn in_progress_backend_is_not_ready() {
        let state = ProvisionState::InProgress {
            retry_after: Duration::from_secs(10),
        };
        let status = desired_status(&machine(), &state);
        assert!(!status.ready);
        assert_eq!(status.ready_condition().expect("ready").reason, "Provisioning");
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let mut bmm = machine();
        bmm.status = Some(desired_status(&bmm, &ProvisionState::Ready));
        let desired = desired_status(&bmm, &ProvisionState::Ready);

        // no expectations: any store call would panic the mock
        let store = MockObjectStore::new();
        let write = apply_status(&store, &bmm, desired).await.expect("ok");
        assert_eq!(write, StatusWrite::Unchanged);
    }

    #[tokio::test]
    async fn write_against_deleted_object_reports_gone() {
        let mut store = MockObjectStore::new();
        store
            .expect_update_bare_metal_machine_status()
            .returning(|_| Err(Error::not_found("BareMetalMachine", "ns/node-1")));

        let bmm = machine();
        let desired = desired_status(&bmm, &ProvisionState::Ready);
        let write = apply_status(&store, &bmm, desired).await.expect("ok");
        assert_eq!(write, StatusWrite::Gone);
    }

    #[tokio::test]
    async fn conflict_is_returned_to_the_caller() {
        let mut store = MockObjectStore::new();
        store
            .expect_update_bare_metal_machine_status()
            .returning(|_| Err(Error::conflict("BareMetalMachine", "ns/node-1", "7")));

        let bmm = machine();
        let desired = desired_status(&bmm, &ProvisionState::Ready);
        let err = apply_status(&store, &bmm, desired).await.expect_err("conflict");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn failure_recording_swallows_write_errors() {
        let mut store = MockObjectStore::new();
        store
            .expect_update_bare_metal_machine_status()
            .times(1)
            .returning(|_| Err(Error::store_unavailable("down")));

        let cause = Error::store_unavailable("down");
        record_failure(&store, &machine(), FAILURE_OWNER_RESOLUTION, &cause).await;
    }

    #[tokio::test]
    async fn failure_is_recorded_on_the_ready_condition() {
        let mut store = MockObjectStore::new();
        store
            .expect_update_bare_metal_machine_status()
            .withf(|bmm| {
                bmm.status.as_ref().is_some_and(|s| {
                    s.failure_reason.as_deref() == Some(FAILURE_PROVISIONING)
                        && s.ready_condition().is_some_and(|c| c.status == ConditionStatus::False)
                })
            })
            .times(1)
            .returning(|bmm| Ok(bmm.clone()));

        let cause = Error::provisioning("bmc timeout");
        record_failure(&store, &machine(), FAILURE_PROVISIONING, &cause).await;
    }
}
