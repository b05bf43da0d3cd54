//! End-to-end reconcile flows over the in-memory store
//!
//! These tests drive the public reconcilers and the manager's reconcile entry
//! points the same way the controller runtime does, with `MemoryStore` standing in for the API server.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;

use capm::controller::{
    BareMetalClusterReconciler, BareMetalMachineReconciler, InfraKind, Outcome, OwnerKind,
    Reconcile,
};
use capm::crd::{
    BareMetalCluster, BareMetalClusterSpec, BareMetalMachine, BareMetalMachineSpec, Cluster,
    ClusterSpec, Machine, MachineSpec,
};
use capm::manager::{error_policy, reconcile, Manager, ManagerConfig};
use capm::store::{MemoryStore, ObjectKey, ObjectStore};

const NS: &str = "default";

fn owner_ref(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "cluster.x-k8s.io/v1alpha3".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NS, name)
}

fn cluster(name: &str, paused: bool) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            paused,
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(NS.to_string());
    cluster
}

fn bare_metal_cluster(name: &str, owner: Option<&str>) -> BareMetalCluster {
    let mut bmc = BareMetalCluster::new(name, BareMetalClusterSpec::default());
    bmc.metadata.namespace = Some(NS.to_string());
    bmc.metadata.owner_references = owner.map(|c| vec![owner_ref("Cluster", c)]);
    bmc
}

fn machine(name: &str, cluster: &str) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            cluster_name: cluster.to_string(),
            ..Default::default()
        },
    );
    machine.metadata.namespace = Some(NS.to_string());
    machine.metadata.owner_references = Some(vec![owner_ref("Cluster", cluster)]);
    machine
}

fn bare_metal_machine(name: &str, machine: &str) -> BareMetalMachine {
    let mut bmm = BareMetalMachine::new(name, BareMetalMachineSpec::default());
    bmm.metadata.namespace = Some(NS.to_string());
    bmm.metadata.owner_references = Some(vec![owner_ref("Machine", machine)]);
    bmm
}

/// Story: a BareMetalCluster "web" is created before the Cluster controller
/// has adopted it. Nothing is written until the owner reference appears.
#[tokio::test]
async fn unowned_cluster_waits_for_owner_then_reconciles() {
    let store = Arc::new(MemoryStore::new());
    store
        .apply_bare_metal_cluster(bare_metal_cluster("web", None))
        .expect("apply");
    let reconciler = BareMetalClusterReconciler::new(store.clone());

    let outcome = reconciler.reconcile(&key("web")).await.expect("reconcile");
    assert_eq!(outcome, Outcome::OwnerNotSet(OwnerKind::Cluster));
    assert_eq!(store.status_writes(), 0);

    store.apply_cluster(cluster("web", false)).expect("apply");
    store
        .apply_bare_metal_cluster(bare_metal_cluster("web", Some("web")))
        .expect("apply");

    let outcome = reconciler.reconcile(&key("web")).await.expect("reconcile");
    assert_eq!(outcome, Outcome::Reconciled);

    let bmc = store
        .get_bare_metal_cluster(&key("web"))
        .await
        .expect("get")
        .expect("exists");
    assert!(bmc.status.expect("status written").ready);
}

/// Story: Cluster "prod" is paused while BareMetalMachine "node-1" is being
/// reconciled. The reconcile stops at the gate and leaves status alone.
#[tokio::test]
async fn paused_cluster_stops_machine_reconcile() {
    let store = Arc::new(MemoryStore::new());
    store.apply_cluster(cluster("prod", true)).expect("apply");
    store.apply_machine(machine("node-1", "prod")).expect("apply");
    store
        .apply_bare_metal_machine(bare_metal_machine("node-1", "node-1"))
        .expect("apply");
    let reconciler = BareMetalMachineReconciler::new(store.clone());

    let outcome = reconciler.reconcile(&key("node-1")).await.expect("reconcile");
    assert_eq!(outcome, Outcome::Paused);
    assert!(outcome.is_done());
    assert_eq!(store.status_writes(), 0);

    let bmm = store
        .get_bare_metal_machine(&key("node-1"))
        .await
        .expect("get")
        .expect("exists");
    assert!(bmm.status.is_none());
}

#[tokio::test]
async fn vanished_object_is_gone_without_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = BareMetalMachineReconciler::new(store.clone());

    let outcome = reconciler.reconcile(&key("ghost")).await.expect("reconcile");
    assert_eq!(outcome, Outcome::Gone);
    assert_eq!(store.status_writes(), 0);
}

#[tokio::test]
async fn repeated_reconciles_write_status_once() {
    let store = Arc::new(MemoryStore::new());
    store.apply_cluster(cluster("prod", false)).expect("apply");
    store.apply_machine(machine("node-1", "prod")).expect("apply");
    store
        .apply_bare_metal_machine(bare_metal_machine("node-1", "node-1"))
        .expect("apply");
    let reconciler = BareMetalMachineReconciler::new(store.clone());

    for _ in 0..3 {
        let outcome = reconciler.reconcile(&key("node-1")).await.expect("reconcile");
        assert_eq!(outcome, Outcome::Reconciled);
    }
    assert_eq!(store.status_writes(), 1);
}

#[tokio::test]
async fn unavailable_store_is_an_error_until_it_recovers() {
    let store = Arc::new(MemoryStore::new());
    store.apply_cluster(cluster("web", false)).expect("apply");
    store
        .apply_bare_metal_cluster(bare_metal_cluster("web", Some("web")))
        .expect("apply");
    let reconciler = BareMetalClusterReconciler::new(store.clone());

    store.set_unavailable(true);
    let err = reconciler.reconcile(&key("web")).await.expect_err("store down");
    assert_eq!(err.reason(), "StoreUnavailable");

    store.set_unavailable(false);
    let outcome = reconciler.reconcile(&key("web")).await.expect("reconcile");
    assert_eq!(outcome, Outcome::Reconciled);
}

/// Story: the API server is down when "node-1" is first triggered. The
/// manager keeps retrying with growing delays and converges once the store is
/// back, forgetting the failures.
#[tokio::test]
async fn manager_retries_until_store_recovers() {
    let store = Arc::new(MemoryStore::new());
    store.apply_cluster(cluster("prod", false)).expect("apply");
    store.apply_machine(machine("node-1", "prod")).expect("apply");
    store
        .apply_bare_metal_machine(bare_metal_machine("node-1", "node-1"))
        .expect("apply");
    let store_dyn: Arc<dyn ObjectStore> = store.clone();
    let manager = Manager::new(ManagerConfig::default(), store_dyn).expect("manager");
    let ctx = manager
        .context(InfraKind::BareMetalMachine)
        .expect("registered")
        .clone();
    let object = Arc::new(
        store
            .get_bare_metal_machine(&key("node-1"))
            .await
            .expect("get")
            .expect("exists"),
    );

    store.set_unavailable(true);
    let mut delays = Vec::new();
    for _ in 0..3 {
        let err = reconcile(object.clone(), ctx.clone())
            .await
            .expect_err("store down");
        delays.push(error_policy(object.clone(), &err, ctx.clone()));
    }
    assert_eq!(
        delays,
        vec![
            Action::requeue(Duration::from_millis(5)),
            Action::requeue(Duration::from_millis(10)),
            Action::requeue(Duration::from_millis(20)),
        ]
    );
    assert_eq!(ctx.failures(&key("node-1")), 3);
    assert_eq!(store.status_writes(), 0);

    store.set_unavailable(false);
    let action = reconcile(object, ctx.clone()).await.expect("reconcile");
    assert_eq!(action, Action::await_change());
    assert_eq!(store.status_writes(), 1);
    assert_eq!(ctx.failures(&key("node-1")), 0);
}

/// Story: "node-1" is edited after it became ready. The next reconcile
/// records the new generation.
#[tokio::test]
async fn spec_change_is_observed_on_next_reconcile() {
    let store = Arc::new(MemoryStore::new());
    store.apply_cluster(cluster("prod", false)).expect("apply");
    store.apply_machine(machine("node-1", "prod")).expect("apply");
    store
        .apply_bare_metal_machine(bare_metal_machine("node-1", "node-1"))
        .expect("apply");
    let reconciler = BareMetalMachineReconciler::new(store.clone());
    reconciler.reconcile(&key("node-1")).await.expect("reconcile");

    let mut edited = store
        .get_bare_metal_machine(&key("node-1"))
        .await
        .expect("get")
        .expect("exists");
    edited.spec.provider_id = Some("metal://rack1/host7".to_string());
    store.apply_bare_metal_machine(edited).expect("apply");

    reconciler.reconcile(&key("node-1")).await.expect("reconcile");
    let status = store
        .get_bare_metal_machine(&key("node-1"))
        .await
        .expect("get")
        .expect("exists")
        .status
        .expect("status written");
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(store.status_writes(), 2);
}
