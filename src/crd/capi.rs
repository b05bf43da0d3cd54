//! Cluster API domain objects read by the provider
//!
//! Only the fields the provider consumes are modelled; everything else in the
//! upstream objects is ignored on deserialization. These objects are never
//! written by this provider.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, ObjectReference};

/// API group of the Cluster API core objects
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Label Cluster API puts on objects belonging to a cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Cluster API Cluster specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "Cluster",
    plural = "clusters",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Suspends reconciliation of the cluster and every object it owns
    #[serde(default)]
    pub paused: bool,

    /// Reference to the provider-specific infrastructure cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Endpoint of the workload cluster's API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Cluster API Machine specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "Machine",
    plural = "machines",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the Cluster this machine belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Reference to the provider-specific infrastructure machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Provider identifier copied from the infrastructure machine
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Kubernetes version the machine should run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_tolerates_unmodelled_upstream_fields() {
        let yaml = r#"
apiVersion: cluster.x-k8s.io/v1alpha3
kind: Cluster
metadata:
  name: prod
  namespace: default
spec:
  paused: true
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
  infrastructureRef:
    apiVersion: infrastructure.cluster.x-k8s.io/v1alpha3
    kind: BareMetalCluster
    name: prod
status:
  phase: Provisioned
"#;
        let cluster: Cluster = serde_yaml::from_str(yaml).expect("parse");
        assert!(cluster.spec.paused);
        let infra = cluster.spec.infrastructure_ref.expect("infrastructureRef");
        assert_eq!(infra.kind.as_deref(), Some("BareMetalCluster"));
    }

    #[test]
    fn cluster_is_not_paused_by_default() {
        let cluster: Cluster = serde_json::from_value(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1alpha3",
            "kind": "Cluster",
            "metadata": { "name": "web", "namespace": "default" },
            "spec": {}
        }))
        .expect("parse");
        assert!(!cluster.spec.paused);
    }

    #[test]
    fn machine_parses_cluster_name_and_infrastructure_ref() {
        let yaml = r#"
apiVersion: cluster.x-k8s.io/v1alpha3
kind: Machine
metadata:
  name: node-1
  namespace: default
  labels:
    cluster.x-k8s.io/cluster-name: prod
spec:
  clusterName: prod
  version: v1.18.2
  bootstrap:
    dataSecretName: node-1-bootstrap
  infrastructureRef:
    apiVersion: infrastructure.cluster.x-k8s.io/v1alpha3
    kind: BareMetalMachine
    name: node-1
"#;
        let machine: Machine = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(machine.spec.cluster_name, "prod");
        assert_eq!(machine.spec.version.as_deref(), Some("v1.18.2"));
        let labels = machine.metadata.labels.expect("labels");
        assert_eq!(labels.get(CLUSTER_NAME_LABEL).map(String::as_str), Some("prod"));
    }
}
