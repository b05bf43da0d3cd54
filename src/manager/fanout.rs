//! Owner → infrastructure fan-out for watch triggers
//!
//! A change to an owner must re-trigger every infrastructure object below it,
//! including ones that earlier stopped at OwnerNotSet. The mappers here scan
//! reflector caches for controller owner references; matches are only hints
//! because the reconciler resolves ownership from the store again.

use std::sync::Arc;

use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;

use crate::controller::{controller_owner_key, OwnerKind};
use crate::crd::{BareMetalMachine, Cluster, Machine};
use crate::store::ObjectKey;

/// Keys of `objects` whose controller owner of kind `owner` is `owner_key`
///
/// References that cannot be followed are skipped here; the reconciler
/// reports them.
pub fn controlled_by<K: Resource>(
    objects: &[Arc<K>],
    owner: OwnerKind,
    owner_key: &ObjectKey,
) -> Vec<ObjectKey> {
    let mut keys: Vec<ObjectKey> = objects
        .iter()
        .filter_map(|object| {
            let key = ObjectKey::from_meta(object.meta())?;
            let refs = object.meta().owner_references.as_deref().unwrap_or_default();
            match controller_owner_key(&key, refs, owner) {
                Ok(Some(found)) if found == *owner_key => Some(key),
                _ => None,
            }
        })
        .collect();
    keys.sort();
    keys
}

/// Keys of the BareMetalMachines below a Cluster, reached through its Machines
pub fn machines_below_cluster(
    machines: &[Arc<Machine>],
    infra: &[Arc<BareMetalMachine>],
    cluster: &ObjectKey,
) -> Vec<ObjectKey> {
    let mut keys: Vec<ObjectKey> = controlled_by(machines, OwnerKind::Cluster, cluster)
        .iter()
        .flat_map(|machine| controlled_by(infra, OwnerKind::Machine, machine))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Controller trigger for the object at `key`
pub fn object_ref<K>(key: &ObjectKey) -> ObjectRef<K>
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef::new(&key.name).within(&key.namespace)
}

/// Watch mapper from an owner to the cached infrastructure objects it controls
pub fn infra_of_owner<K, O>(
    infra: Store<K>,
    owner: OwnerKind,
) -> impl Fn(O) -> Vec<ObjectRef<K>> + Send + Sync + 'static
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    O: Resource + 'static,
{
    move |owner_object: O| {
        let Some(owner_key) = ObjectKey::from_meta(owner_object.meta()) else {
            return Vec::new();
        };
        let targets = controlled_by(&infra.state(), owner, &owner_key);
        if !targets.is_empty() {
            tracing::debug!(%owner, name = %owner_key, count = targets.len(), "owner changed, triggering children");
        }
        targets.iter().map(object_ref).collect()
    }
}

/// Watch mapper from a Cluster to the BareMetalMachines below its Machines
pub fn machines_of_cluster(
    machines: Store<Machine>,
    infra: Store<BareMetalMachine>,
) -> impl Fn(Cluster) -> Vec<ObjectRef<BareMetalMachine>> + Send + Sync + 'static {
    move |cluster: Cluster| {
        let Some(cluster_key) = ObjectKey::from_meta(&cluster.metadata) else {
            return Vec::new();
        };
        let targets = machines_below_cluster(&machines.state(), &infra.state(), &cluster_key);
        if !targets.is_empty() {
            tracing::debug!(cluster = %cluster_key, count = targets.len(), "cluster changed, triggering machines");
        }
        targets.iter().map(object_ref).collect()
    }
}
