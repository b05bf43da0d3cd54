//! Pause gate

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::Cluster;

/// Annotation that suspends reconciliation of the object carrying it
///
/// Only presence matters; the value is ignored.
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Whether the object carries the pause annotation
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

/// Whether reconciliation of an infrastructure object must be suspended
///
/// True when the owning Cluster is paused through its spec or annotation, or
/// when the infrastructure object itself is annotated.
pub fn is_paused(cluster: &Cluster, infra: &ObjectMeta) -> bool {
    cluster.spec.paused || has_paused_annotation(&cluster.metadata) || has_paused_annotation(infra)
}
