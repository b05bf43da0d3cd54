//! capm - bare-metal infrastructure provider for Cluster API

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capm::backoff::{retry_with_backoff, BackoffConfig};
use capm::controller::InfraKind;
use capm::crd::{BareMetalCluster, BareMetalMachine};
use capm::manager::{ControllerConfig, Manager, ManagerConfig};
use capm::store::KubeStore;

/// Default log filter when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "info,capm=debug,kube=info";

/// Attempts made to install CRDs before giving up
const CRD_INSTALL_ATTEMPTS: u32 = 5;

/// capm - reconciles BareMetalCluster and BareMetalMachine objects
#[derive(Parser, Debug)]
#[command(name = "capm", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Install or update the CRDs before starting the controllers
    #[arg(long)]
    install_crds: bool,

    /// Only watch and reconcile objects in this namespace
    #[arg(long, env = "CAPM_NAMESPACE")]
    namespace: Option<String>,

    /// Number of BareMetalCluster objects reconciled concurrently
    #[arg(long, default_value_t = capm::manager::DEFAULT_CLUSTER_CONCURRENCY)]
    baremetalcluster_concurrency: usize,

    /// Number of BareMetalMachine objects reconciled concurrently
    #[arg(long, default_value_t = capm::manager::DEFAULT_MACHINE_CONCURRENCY)]
    baremetalmachine_concurrency: usize,

    /// Seconds between full resyncs of every object
    #[arg(long, default_value_t = 600)]
    sync_period_secs: u64,

    /// Ceiling in seconds for the per-object failure backoff
    #[arg(long, default_value_t = 1000)]
    backoff_max_secs: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            namespace: self.namespace.clone(),
            sync_period: Duration::from_secs(self.sync_period_secs),
            backoff: BackoffConfig::with_max_delay(Duration::from_secs(self.backoff_max_secs)),
            controllers: vec![
                ControllerConfig {
                    kind: InfraKind::BareMetalCluster,
                    max_concurrent: self.baremetalcluster_concurrency,
                },
                ControllerConfig {
                    kind: InfraKind::BareMetalMachine,
                    max_concurrent: self.baremetalmachine_concurrency,
                },
            ],
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML
        let cluster = serde_yaml::to_string(&BareMetalCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        let machine = serde_yaml::to_string(&BareMetalMachine::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{cluster}---\n{machine}");
        return Ok(());
    }

    init_tracing(cli.log_format);

    let config = cli.manager_config();
    config.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let store = Arc::new(KubeStore::new(client.clone()));
    let manager = Manager::new(config, store)?;

    tracing::info!("Starting capm controllers");
    manager.run(client).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Ensure the infrastructure CRDs are installed
///
/// Uses server-side apply so repeated runs converge instead of failing on
/// existing definitions.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(capm::FIELD_MANAGER).force();
    let backoff = BackoffConfig::default();

    for crd in [BareMetalCluster::crd(), BareMetalMachine::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let patch = Patch::Apply(&crd);
        tracing::info!(crd = %name, "Installing CRD...");
        retry_with_backoff(&backoff, CRD_INSTALL_ATTEMPTS, "install_crd", || {
            crds.patch(&name, &params, &patch)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All capm CRDs installed/updated");
    Ok(())
}
