//! Object store client boundary
//!
//! The reconcilers never talk to the API server directly. Everything they
//! read or write goes through [`ObjectStore`], keyed by [`ObjectKey`], so that
//! the same reconcile code runs against the Kubernetes API ([`KubeStore`]) and
//! against the in-process [`MemoryStore`].

mod kubernetes;
mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

#[cfg(test)]
use mockall::automock;

use crate::crd::{BareMetalCluster, BareMetalMachine, Cluster, Machine};
use crate::Error;

pub use kubernetes::KubeStore;
pub use memory::MemoryStore;

/// Identity of a namespaced object
///
/// This is the only payload a reconcile request carries; current state is
/// always re-fetched through the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object from its metadata
    ///
    /// Returns None when either the name or the namespace is missing.
    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        match (meta.namespace.as_deref(), meta.name.as_deref()) {
            (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => {
                Some(Self::new(ns, name))
            }
            _ => None,
        }
    }

    /// Key of a sibling object with the given name in the same namespace
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::config(format!(
                "invalid object key '{s}', expected namespace/name"
            ))),
        }
    }
}

/// Trait abstracting object store operations for the reconcilers
///
/// Getters return `Ok(None)` for objects that do not exist so that "not
/// found" is distinguishable from every other failure. Status writes are
/// compare-and-swap on the resource version carried by the object passed in
/// and fail with [`Error::Conflict`] when that version is stale.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a BareMetalCluster by key
    async fn get_bare_metal_cluster(&self, key: &ObjectKey)
        -> Result<Option<BareMetalCluster>, Error>;

    /// Get a BareMetalMachine by key
    async fn get_bare_metal_machine(&self, key: &ObjectKey)
        -> Result<Option<BareMetalMachine>, Error>;

    /// Get a Cluster API Cluster by key
    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>, Error>;

    /// Get a Cluster API Machine by key
    async fn get_machine(&self, key: &ObjectKey) -> Result<Option<Machine>, Error>;

    /// Write the status block of a BareMetalCluster
    async fn update_bare_metal_cluster_status(
        &self,
        object: &BareMetalCluster,
    ) -> Result<BareMetalCluster, Error>;

    /// Write the status block of a BareMetalMachine
    async fn update_bare_metal_machine_status(
        &self,
        object: &BareMetalMachine,
    ) -> Result<BareMetalMachine, Error>;
}
