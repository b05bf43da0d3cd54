//! Controller manager
//!
//! Runs one `kube::runtime::Controller` per configured infrastructure kind.
//! Each controller watches its own kind and the owner kinds above it, caps
//! concurrent reconciles at the kind's configured limit, re-triggers every
//! cached object once per sync period and drains in-flight reconciles on
//! SIGINT/SIGTERM. The runtime never runs two reconciles of one object at
//! the same time and collapses repeated triggers for an object into one.

pub mod fanout;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, Resource};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffConfig, KeyedBackoff};
use crate::controller::{
    BareMetalClusterReconciler, BareMetalMachineReconciler, InfraKind, OwnerKind, Reconcile,
};
use crate::crd::{BareMetalCluster, BareMetalMachine, Cluster, Machine};
use crate::store::{ObjectKey, ObjectStore};
use crate::Error;

/// Watcher timeout (seconds); must stay below the client read timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller driven to completion by [`Manager::run`]
type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Default worker count for BareMetalCluster
pub const DEFAULT_CLUSTER_CONCURRENCY: usize = 5;

/// Default worker count for BareMetalMachine
pub const DEFAULT_MACHINE_CONCURRENCY: usize = 10;

/// Largest per-kind concurrency the controller runtime accepts
pub const MAX_CONCURRENCY: usize = u16::MAX as usize;

/// Default interval between full resyncs
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Settings for one infrastructure kind
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Kind handled by this controller
    pub kind: InfraKind,
    /// Maximum reconciles of this kind running at once
    pub max_concurrent: usize,
}

/// Everything the manager needs to know, passed explicitly
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerConfig {
    /// Restrict watches to one namespace
    pub namespace: Option<String>,
    /// Interval after which every object is reconciled again
    pub sync_period: Duration,
    /// Backoff schedule for failed reconciles
    pub backoff: BackoffConfig,
    /// Registered kinds
    pub controllers: Vec<ControllerConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            sync_period: DEFAULT_SYNC_PERIOD,
            backoff: BackoffConfig::default(),
            controllers: vec![
                ControllerConfig {
                    kind: InfraKind::BareMetalCluster,
                    max_concurrent: DEFAULT_CLUSTER_CONCURRENCY,
                },
                ControllerConfig {
                    kind: InfraKind::BareMetalMachine,
                    max_concurrent: DEFAULT_MACHINE_CONCURRENCY,
                },
            ],
        }
    }
}

impl ManagerConfig {
    /// Check the configuration for values the manager cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.sync_period.is_zero() {
            return Err(Error::config("sync period must be greater than zero"));
        }
        if matches!(self.namespace.as_deref(), Some("")) {
            return Err(Error::config("namespace must not be empty when set"));
        }
        if self.backoff.initial_delay.is_zero() || self.backoff.multiplier < 1.0 {
            return Err(Error::config(
                "backoff needs a non-zero initial delay and a multiplier of at least 1",
            ));
        }
        if self.backoff.max_delay.is_zero() || self.backoff.max_delay < self.backoff.initial_delay {
            return Err(Error::config(
                "backoff ceiling must be non-zero and not below the initial delay",
            ));
        }
        if self.controllers.is_empty() {
            return Err(Error::config("no controllers configured"));
        }

        let mut seen = HashSet::new();
        for controller in &self.controllers {
            if controller.max_concurrent == 0 || controller.max_concurrent > MAX_CONCURRENCY {
                return Err(Error::config(format!(
                    "{} concurrency must be between 1 and {MAX_CONCURRENCY}",
                    controller.kind
                )));
            }
            if !seen.insert(controller.kind) {
                return Err(Error::config(format!(
                    "{} registered more than once",
                    controller.kind
                )));
            }
        }
        Ok(())
    }
}

/// Shared state handed to every reconcile of one kind
pub struct Context {
    reconciler: Arc<dyn Reconcile>,
    backoff: KeyedBackoff<ObjectKey>,
}

impl Context {
    /// Wrap `reconciler`, retrying its failures on the `backoff` schedule
    pub fn new(reconciler: Arc<dyn Reconcile>, backoff: BackoffConfig) -> Self {
        Self {
            reconciler,
            backoff: KeyedBackoff::new(backoff),
        }
    }

    /// Kind handled by this context
    pub fn kind(&self) -> InfraKind {
        self.reconciler.kind()
    }

    /// Consecutive failed reconciles of `key`
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.backoff.failures(key)
    }
}

/// Reconcile one triggered object
///
/// Only the object's key is used; the reconciler re-fetches current state.
/// A successful reconcile resets the key's backoff. `RequeueAfter` becomes a
/// timed requeue and every other outcome waits for the next trigger.
pub async fn reconcile<K>(object: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error>
where
    K: Resource + Send + Sync + 'static,
{
    let kind = ctx.kind();
    let Some(key) = ObjectKey::from_meta(object.meta()) else {
        warn!(%kind, "triggered object has no namespace/name, skipping");
        return Ok(Action::await_change());
    };

    let outcome = ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.forget(&key);

    match outcome.requeue_delay() {
        Some(delay) => {
            debug!(%kind, %key, outcome = outcome.reason(), delay_ms = delay.as_millis(), "requeue scheduled");
            Ok(Action::requeue(delay))
        }
        None => {
            debug!(%kind, %key, outcome = outcome.reason(), "reconcile done");
            Ok(Action::await_change())
        }
    }
}

/// Requeue a failed object after its next exponential backoff delay
pub fn error_policy<K>(object: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    let kind = ctx.kind();
    let Some(key) = ObjectKey::from_meta(object.meta()) else {
        return Action::await_change();
    };
    let delay = ctx.backoff.next_delay(&key);
    warn!(
        %kind,
        %key,
        error = %error,
        reason = error.reason(),
        retry_in_ms = delay.as_millis(),
        failures = ctx.failures(&key),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

/// Controller runtime settings for a kind allowed `max_concurrent` reconciles
pub fn runtime_config(max_concurrent: usize) -> controller::Config {
    controller::Config::default().concurrency(u16::try_from(max_concurrent).unwrap_or(u16::MAX))
}

/// Trigger stream ticking once per `period`, starting one period from now
fn resync_every(period: Duration) -> impl Stream<Item = ()> + Send + Sync + 'static {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    futures::stream::unfold(ticker, |mut ticker| async move {
        ticker.tick().await;
        Some(((), ticker))
    })
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Log each reconciliation result from a controller stream
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

/// Keep `writer` in sync with every object visible through `api`
async fn reflect<K>(api: Api<K>, writer: Writer<K>, label: &'static str)
where
    K: Resource<DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    info!(resource = label, "cache started");
    reflector::reflector(writer, watcher::watcher(api, watcher_config()).default_backoff())
        .for_each(|event| {
            if let Err(e) = event {
                warn!(resource = label, error = %e, "watcher error, will retry");
            }
            std::future::ready(())
        })
        .await;
    warn!(resource = label, "cache stream ended");
}

/// Owns the per-kind reconcile contexts and runs their controllers
pub struct Manager {
    config: ManagerConfig,
    contexts: Vec<Arc<Context>>,
}

impl Manager {
    /// Build a manager with the default reconciler for every configured kind
    pub fn new(config: ManagerConfig, store: Arc<dyn ObjectStore>) -> Result<Self, Error> {
        let reconcilers = config
            .controllers
            .iter()
            .map(|c| -> Arc<dyn Reconcile> {
                match c.kind {
                    InfraKind::BareMetalCluster => {
                        Arc::new(BareMetalClusterReconciler::new(store.clone()))
                    }
                    InfraKind::BareMetalMachine => {
                        Arc::new(BareMetalMachineReconciler::new(store.clone()))
                    }
                }
            })
            .collect();
        Self::with_reconcilers(config, reconcilers)
    }

    /// Build a manager from explicit reconcilers, one per configured kind
    pub fn with_reconcilers(
        config: ManagerConfig,
        reconcilers: Vec<Arc<dyn Reconcile>>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut contexts = Vec::with_capacity(config.controllers.len());
        for controller in &config.controllers {
            let reconciler = reconcilers
                .iter()
                .find(|r| r.kind() == controller.kind)
                .cloned()
                .ok_or_else(|| Error::config(format!("no reconciler for {}", controller.kind)))?;
            contexts.push(Arc::new(Context::new(reconciler, config.backoff.clone())));
        }

        Ok(Self { config, contexts })
    }

    /// The manager's configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Reconcile context for `kind`, if registered
    pub fn context(&self, kind: InfraKind) -> Option<&Arc<Context>> {
        self.contexts.iter().find(|c| c.kind() == kind)
    }

    /// Run every controller until SIGINT/SIGTERM
    ///
    /// Each controller stops taking new work on the signal and returns once
    /// its in-flight reconciles have finished.
    pub async fn run(self, client: Client) {
        let mut caches = JoinSet::new();
        let mut controllers: Vec<ControllerFuture> = Vec::new();

        for settings in &self.config.controllers {
            let Some(ctx) = self.context(settings.kind).cloned() else {
                continue;
            };
            info!(kind = %settings.kind, max_concurrent = settings.max_concurrent, "- {} controller", settings.kind);
            let controller = match settings.kind {
                InfraKind::BareMetalCluster => self.cluster_controller(&client, settings, ctx),
                InfraKind::BareMetalMachine => {
                    let (machines, writer) = reflector::store::<Machine>();
                    caches.spawn(reflect(
                        api::<Machine>(&client, self.config.namespace.as_deref()),
                        writer,
                        "machines",
                    ));
                    self.machine_controller(&client, settings, machines, ctx)
                }
            };
            controllers.push(controller);
        }

        info!(
            controllers = controllers.len(),
            namespace = self.config.namespace.as_deref().unwrap_or("<all>"),
            sync_period_secs = self.config.sync_period.as_secs(),
            "manager started"
        );

        futures::future::join_all(controllers).await;
        caches.abort_all();
        info!("manager stopped");
    }

    fn cluster_controller(
        &self,
        client: &Client,
        settings: &ControllerConfig,
        ctx: Arc<Context>,
    ) -> ControllerFuture {
        let namespace = self.config.namespace.as_deref();
        let controller = Controller::new(api::<BareMetalCluster>(client, namespace), watcher_config())
            .with_config(runtime_config(settings.max_concurrent));
        let infra = controller.store();

        Box::pin(
            controller
                .watches(
                    api::<Cluster>(client, namespace),
                    watcher_config(),
                    fanout::infra_of_owner::<BareMetalCluster, Cluster>(infra, OwnerKind::Cluster),
                )
                .reconcile_all_on(resync_every(self.config.sync_period))
                .shutdown_on_signal()
                .run(
                    reconcile::<BareMetalCluster>,
                    error_policy::<BareMetalCluster>,
                    ctx,
                )
                .for_each(log_reconcile_result("BareMetalCluster")),
        )
    }

    fn machine_controller(
        &self,
        client: &Client,
        settings: &ControllerConfig,
        machines: reflector::Store<Machine>,
        ctx: Arc<Context>,
    ) -> ControllerFuture {
        let namespace = self.config.namespace.as_deref();
        let controller = Controller::new(api::<BareMetalMachine>(client, namespace), watcher_config())
            .with_config(runtime_config(settings.max_concurrent));
        let infra = controller.store();

        Box::pin(
            controller
                .watches(
                    api::<Machine>(client, namespace),
                    watcher_config(),
                    fanout::infra_of_owner::<BareMetalMachine, Machine>(
                        infra.clone(),
                        OwnerKind::Machine,
                    ),
                )
                .watches(
                    api::<Cluster>(client, namespace),
                    watcher_config(),
                    fanout::machines_of_cluster(machines, infra),
                )
                .reconcile_all_on(resync_every(self.config.sync_period))
                .shutdown_on_signal()
                .run(
                    reconcile::<BareMetalMachine>,
                    error_policy::<BareMetalMachine>,
                    ctx,
                )
                .for_each(log_reconcile_result("BareMetalMachine")),
        )
    }
}
