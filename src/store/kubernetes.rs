//! Object store backed by the Kubernetes API server

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ObjectKey, ObjectStore};
use crate::crd::{BareMetalCluster, BareMetalMachine, Cluster, Machine};
use crate::Error;

/// Real Kubernetes client implementation of [`ObjectStore`]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, key: &ObjectKey) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(&key.namespace).get_opt(&key.name).await?)
    }

    /// Merge-patch the status subresource, pinned to the object's resource version
    ///
    /// Including `metadata.resourceVersion` in the patch makes the API server
    /// reject it with 409 if the object changed since it was read.
    async fn update_status<K, S>(&self, object: &K, status: &S) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
        S: Serialize,
    {
        let kind = K::kind(&());
        let key = ObjectKey::from_meta(object.meta())
            .ok_or_else(|| Error::store_unavailable(format!("{kind} without namespace/name")))?;
        let kind_name: &'static str = static_kind(&kind);
        let version = pinned_version(object.resource_version(), kind_name, &key)?;
        let patch = status_patch(&version, status);

        debug!(%key, kind = kind_name, resource_version = %version, "patching status");
        self.api::<K>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(e, kind_name, &key, &version))
    }
}

/// Resource version a status write is pinned to
///
/// An object read without one cannot be written safely, so it is reported as
/// a conflict and the reconcile retries from a fresh read.
fn pinned_version(
    version: Option<String>,
    kind: &'static str,
    key: &ObjectKey,
) -> Result<String, Error> {
    version.ok_or_else(|| Error::conflict(kind, key, "<none>"))
}

/// Merge-patch body replacing the status at `resource_version`
///
/// Status fields that are `None` serialize as `null`, which removes them on
/// the server.
fn status_patch<S: Serialize>(resource_version: &str, status: &S) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

/// Translate a failed status write into the store's error vocabulary
fn map_write_error(e: kube::Error, kind: &'static str, key: &ObjectKey, version: &str) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, key),
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(kind, key, version),
        other => Error::Kube(other),
    }
}

/// Map a CRD kind to the static name used in errors
fn static_kind(kind: &str) -> &'static str {
    match kind {
        "BareMetalCluster" => "BareMetalCluster",
        "BareMetalMachine" => "BareMetalMachine",
        "Cluster" => "Cluster",
        "Machine" => "Machine",
        _ => "Object",
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_bare_metal_cluster(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<BareMetalCluster>, Error> {
        self.get(key).await
    }

    async fn get_bare_metal_machine(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<BareMetalMachine>, Error> {
        self.get(key).await
    }

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>, Error> {
        self.get(key).await
    }

    async fn get_machine(&self, key: &ObjectKey) -> Result<Option<Machine>, Error> {
        self.get(key).await
    }

    async fn update_bare_metal_cluster_status(
        &self,
        object: &BareMetalCluster,
    ) -> Result<BareMetalCluster, Error> {
        self.update_status(object, &object.status).await
    }

    async fn update_bare_metal_machine_status(
        &self,
        object: &BareMetalMachine,
    ) -> Result<BareMetalMachine, Error> {
        self.update_status(object, &object.status).await
    }
}
