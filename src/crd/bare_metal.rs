//! BareMetalCluster and BareMetalMachine Custom Resource Definitions
//!
//! These are the infrastructure objects this provider reconciles. Their spec
//! belongs to the owning Cluster API object; the provider only writes status.

use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    find_condition, set_condition, ApiEndpoint, Condition, ConditionStatus, READY_CONDITION,
};

/// Specification for a BareMetalCluster
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1alpha3
/// kind: BareMetalCluster
/// metadata:
///   name: web
///   namespace: default
///   ownerReferences:
///     - apiVersion: cluster.x-k8s.io/v1alpha3
///       kind: Cluster
///       name: web
///       uid: 6f1c...
///       controller: true
/// spec:
///   controlPlaneEndpoint:
///     host: 10.0.0.10
///     port: 6443
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "BareMetalCluster",
    plural = "baremetalclusters",
    shortname = "bmc",
    status = "InfrastructureStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalClusterSpec {
    /// Endpoint used to reach the workload cluster's API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Specification for a BareMetalMachine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "BareMetalMachine",
    plural = "baremetalmachines",
    shortname = "bmm",
    status = "InfrastructureStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalMachineSpec {
    /// Unique identifier of the host, as reported back to the Machine
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Operating system image to deploy onto the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

/// Image to be written to a host's disk
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Location of the image
    pub url: String,

    /// Checksum of the image, verified before the host is booted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Observed state of a BareMetalCluster or BareMetalMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// Infrastructure is provisioned and usable by the owner
    #[serde(default)]
    pub ready: bool,

    /// Conditions representing the observed state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec the status was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,

    // Cleared fields serialize as null so a merge patch removes them.
    /// Machine-readable reason for the last failure
    #[serde(default)]
    pub failure_reason: Option<String>,

    /// Human-readable message for the last failure
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl InfrastructureStatus {
    /// Status after a successful reconcile of the given generation
    pub fn ready(mut self, ready: bool, reason: &str, generation: Option<i64>) -> Self {
        let status = if ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        self.ready = ready;
        self.observed_generation = generation;
        self.failure_reason = None;
        self.failure_message = None;
        set_condition(
            &mut self.conditions,
            Condition::new(READY_CONDITION, status, reason, ""),
        );
        self
    }

    /// Status recording a failure; the object is no longer ready
    pub fn failed(mut self, reason: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        self.ready = false;
        self.failure_reason = Some(reason.to_string());
        self.failure_message = Some(message.clone());
        set_condition(
            &mut self.conditions,
            Condition::new(READY_CONDITION, ConditionStatus::False, reason, message),
        );
        self
    }

    /// The Ready condition, if any
    pub fn ready_condition(&self) -> Option<&Condition> {
        find_condition(&self.conditions, READY_CONDITION)
    }
}

/// Infrastructure objects whose status block this provider owns
pub trait InfrastructureObject: Resource + Clone + Send + Sync + 'static {
    /// Kind name used in errors and logs
    const KIND: &'static str;

    /// Current status block, if any
    fn status_block(&self) -> Option<&InfrastructureStatus>;

    /// Replace the status block
    fn set_status_block(&mut self, status: Option<InfrastructureStatus>);
}

impl InfrastructureObject for BareMetalCluster {
    const KIND: &'static str = "BareMetalCluster";

    fn status_block(&self) -> Option<&InfrastructureStatus> {
        self.status.as_ref()
    }

    fn set_status_block(&mut self, status: Option<InfrastructureStatus>) {
        self.status = status;
    }
}

impl InfrastructureObject for BareMetalMachine {
    const KIND: &'static str = "BareMetalMachine";

    fn status_block(&self) -> Option<&InfrastructureStatus> {
        self.status.as_ref()
    }

    fn set_status_block(&mut self, status: Option<InfrastructureStatus>) {
        self.status = status;
    }
}
