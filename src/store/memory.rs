//! In-process object store
//!
//! Keeps objects in ordered maps and hands out monotonically increasing
//! resource versions, so status writes get the same compare-and-swap
//! semantics the API server gives them. Used by the tests and by anything
//! that wants to drive the reconcilers without a cluster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use kube::Resource;
use parking_lot::RwLock;

use super::{ObjectKey, ObjectStore};
use crate::crd::{BareMetalCluster, BareMetalMachine, Cluster, InfrastructureObject, Machine};
use crate::Error;

struct Table<K> {
    objects: RwLock<BTreeMap<ObjectKey, K>>,
}

impl<K: Resource + Clone> Table<K> {
    fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    fn get(&self, key: &ObjectKey) -> Option<K> {
        self.objects.read().get(key).cloned()
    }

    fn remove(&self, key: &ObjectKey) -> Option<K> {
        self.objects.write().remove(key)
    }
}

/// Object store holding everything in memory
pub struct MemoryStore {
    bare_metal_clusters: Table<BareMetalCluster>,
    bare_metal_machines: Table<BareMetalMachine>,
    clusters: Table<Cluster>,
    machines: Table<Machine>,
    resource_version: AtomicU64,
    unavailable: AtomicBool,
    status_writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            bare_metal_clusters: Table::new(),
            bare_metal_machines: Table::new(),
            clusters: Table::new(),
            machines: Table::new(),
            resource_version: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            status_writes: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail with [`Error::StoreUnavailable`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of status writes that were accepted
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Create or replace a BareMetalCluster
    pub fn apply_bare_metal_cluster(&self, obj: BareMetalCluster) -> Result<BareMetalCluster, Error> {
        self.apply(&self.bare_metal_clusters, obj)
    }

    /// Create or replace a BareMetalMachine
    pub fn apply_bare_metal_machine(&self, obj: BareMetalMachine) -> Result<BareMetalMachine, Error> {
        self.apply(&self.bare_metal_machines, obj)
    }

    /// Create or replace a Cluster
    pub fn apply_cluster(&self, obj: Cluster) -> Result<Cluster, Error> {
        self.apply(&self.clusters, obj)
    }

    /// Create or replace a Machine
    pub fn apply_machine(&self, obj: Machine) -> Result<Machine, Error> {
        self.apply(&self.machines, obj)
    }

    /// Delete a BareMetalCluster, returning whether it existed
    pub fn delete_bare_metal_cluster(&self, key: &ObjectKey) -> bool {
        self.bare_metal_clusters.remove(key).is_some()
    }

    /// Delete a BareMetalMachine, returning whether it existed
    pub fn delete_bare_metal_machine(&self, key: &ObjectKey) -> bool {
        self.bare_metal_machines.remove(key).is_some()
    }

    /// Delete a Cluster, returning whether it existed
    pub fn delete_cluster(&self, key: &ObjectKey) -> bool {
        self.clusters.remove(key).is_some()
    }

    /// Delete a Machine, returning whether it existed
    pub fn delete_machine(&self, key: &ObjectKey) -> bool {
        self.machines.remove(key).is_some()
    }

    fn next_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("memory store marked unavailable"));
        }
        Ok(())
    }

    fn apply<K: Resource + Clone>(&self, table: &Table<K>, mut obj: K) -> Result<K, Error> {
        let key = ObjectKey::from_meta(obj.meta())
            .ok_or_else(|| Error::config("object needs both namespace and name"))?;

        let mut objects = table.objects.write();
        let previous_generation = objects
            .get(&key)
            .and_then(|existing| existing.meta().generation);
        let meta = obj.meta_mut();
        meta.resource_version = Some(self.next_version());
        meta.generation = match previous_generation {
            Some(previous) => Some(previous + 1),
            None => Some(meta.generation.unwrap_or(1)),
        };
        objects.insert(key, obj.clone());
        Ok(obj)
    }

    fn update_status<K: InfrastructureObject>(&self, table: &Table<K>, obj: &K) -> Result<K, Error> {
        self.check_available()?;
        let key = ObjectKey::from_meta(obj.meta())
            .ok_or_else(|| Error::store_unavailable(format!("{} without namespace/name", K::KIND)))?;
        let expected = obj.meta().resource_version.clone().unwrap_or_default();

        let mut objects = table.objects.write();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(K::KIND, &key))?;
        if stored.meta().resource_version.as_deref() != Some(expected.as_str()) {
            return Err(Error::conflict(K::KIND, &key, expected));
        }

        stored.set_status_block(obj.status_block().cloned());
        stored.meta_mut().resource_version = Some(self.next_version());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_bare_metal_cluster(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<BareMetalCluster>, Error> {
        self.check_available()?;
        Ok(self.bare_metal_clusters.get(key))
    }

    async fn get_bare_metal_machine(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<BareMetalMachine>, Error> {
        self.check_available()?;
        Ok(self.bare_metal_machines.get(key))
    }

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>, Error> {
        self.check_available()?;
        Ok(self.clusters.get(key))
    }

    async fn get_machine(&self, key: &ObjectKey) -> Result<Option<Machine>, Error> {
        self.check_available()?;
        Ok(self.machines.get(key))
    }

    async fn update_bare_metal_cluster_status(
        &self,
        object: &BareMetalCluster,
    ) -> Result<BareMetalCluster, Error> {
        self.update_status(&self.bare_metal_clusters, object)
    }

    async fn update_bare_metal_machine_status(
        &self,
        object: &BareMetalMachine,
    ) -> Result<BareMetalMachine, Error> {
        self.update_status(&self.bare_metal_machines, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BareMetalMachineSpec, ClusterSpec, InfrastructureStatus};

    fn machine(ns: &str, name: &str) -> BareMetalMachine {
        let mut bmm = BareMetalMachine::new(name, BareMetalMachineSpec::default());
        bmm.metadata.namespace = Some(ns.to_string());
        bmm
    }

    #[tokio::test]
    async fn apply_assigns_resource_version_and_generation() {
        let store = MemoryStore::new();
        let stored = store
            .apply_bare_metal_machine(machine("ns", "node-1"))
            .expect("apply");

        assert_eq!(stored.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(stored.metadata.generation, Some(1));

        let fetched = store
            .get_bare_metal_machine(&ObjectKey::new("ns", "node-1"))
            .await
            .expect("get")
            .expect("present");
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn reapplying_bumps_generation() {
        let store = MemoryStore::new();
        store
            .apply_bare_metal_machine(machine("ns", "node-1"))
            .expect("apply");
        let second = store
            .apply_bare_metal_machine(machine("ns", "node-1"))
            .expect("apply");
        let third = store.apply_bare_metal_machine(second).expect("apply");

        assert_eq!(third.metadata.generation, Some(3));
        assert_eq!(third.metadata.resource_version.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn missing_objects_are_none_not_errors() {
        let store = MemoryStore::new();
        let got = store
            .get_cluster(&ObjectKey::new("ns", "prod"))
            .await
            .expect("get");
        assert!(got.is_none());
    }

    #[test]
    fn apply_rejects_objects_without_namespace() {
        let store = MemoryStore::new();
        let cluster = Cluster::new("prod", ClusterSpec::default());
        assert!(store.apply_cluster(cluster).is_err());
    }

    mod status_writes {
        use super::*;

        #[tokio::test]
        async fn write_with_current_version_succeeds_and_bumps_version() {
            let store = MemoryStore::new();
            let mut bmm = store
                .apply_bare_metal_machine(machine("ns", "node-1"))
                .expect("apply");
            bmm.status = Some(InfrastructureStatus::default().ready(true, "Provisioned", Some(1)));

            let written = store
                .update_bare_metal_machine_status(&bmm)
                .await
                .expect("write");
            assert_ne!(written.metadata.resource_version, bmm.metadata.resource_version);
            assert!(written.status.expect("status").ready);
            assert_eq!(store.status_writes(), 1);
        }

        #[tokio::test]
        async fn stale_version_is_a_conflict() {
            let store = MemoryStore::new();
            let mut stale = store
                .apply_bare_metal_machine(machine("ns", "node-1"))
                .expect("apply");
            // someone else updates the object in between
            store
                .apply_bare_metal_machine(machine("ns", "node-1"))
                .expect("apply");

            stale.status = Some(InfrastructureStatus::default());
            let err = store
                .update_bare_metal_machine_status(&stale)
                .await
                .expect_err("conflict");
            assert!(err.is_conflict());
            assert_eq!(store.status_writes(), 0);
        }

        #[tokio::test]
        async fn write_to_deleted_object_is_not_found() {
            let store = MemoryStore::new();
            let bmm = store
                .apply_bare_metal_machine(machine("ns", "node-1"))
                .expect("apply");
            assert!(store.delete_bare_metal_machine(&ObjectKey::new("ns", "node-1")));

            let err = store
                .update_bare_metal_machine_status(&bmm)
                .await
                .expect_err("gone");
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn status_write_leaves_spec_untouched() {
            let store = MemoryStore::new();
            let mut bmm = store
                .apply_bare_metal_machine(machine("ns", "node-1"))
                .expect("apply");
            bmm.spec.provider_id = Some("metal://changed".to_string());
            bmm.status = Some(InfrastructureStatus::default());

            let written = store
                .update_bare_metal_machine_status(&bmm)
                .await
                .expect("write");
            assert!(written.spec.provider_id.is_none());
        }
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .get_bare_metal_machine(&ObjectKey::new("ns", "node-1"))
            .await
            .expect_err("unavailable");
        assert_eq!(err.reason(), "StoreUnavailable");

        store.set_unavailable(false);
        assert!(store
            .get_bare_metal_machine(&ObjectKey::new("ns", "node-1"))
            .await
            .expect("get")
            .is_none());
    }
}
