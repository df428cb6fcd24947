use clap::Parser;
use pkg_bootstrap::addons::install_order;
use pkg_bootstrap::{BootstrapError, BootstrapSettings, Collaborators, Orchestrator};
use pkg_constants::paths;
use pkg_state::StatusStore;
use pkg_types::cluster::ClusterSpec;
use pkg_types::config::{BootstrapConfigFile, load_config_file};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "metalboot",
    about = "Bootstrap a bare-metal Kubernetes cluster from a PXE boot node"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = paths::DEFAULT_CONFIG)]
    config: String,

    /// Cluster spec to bootstrap
    #[arg(long)]
    cluster_spec: Option<String>,

    /// Status document read by the dashboard
    #[arg(long)]
    status_path: Option<String>,

    /// Where the retrieved admin kubeconfig is written
    #[arg(long)]
    kubeconfig_path: Option<String>,

    /// Directory for rendered boot artifacts
    #[arg(long)]
    output_dir: Option<String>,

    /// Directory with locally maintained add-on manifests
    #[arg(long)]
    manifest_dir: Option<String>,

    /// SSH identity used to reach the controllers
    #[arg(long)]
    ssh_identity: Option<String>,

    /// Overall deadline for the waiting phase, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Poll interval, in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Validate the cluster spec, print the add-on plan and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), BootstrapError> {
    let file_cfg: BootstrapConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let spec_path = cli
        .cluster_spec
        .clone()
        .or_else(|| file_cfg.cluster_spec.clone())
        .unwrap_or_else(|| paths::DEFAULT_CLUSTER_SPEC.to_string());
    let settings = resolve_settings(&cli, &file_cfg);

    info!("Starting metalboot");
    info!("  Cluster spec: {}", spec_path);
    info!("  Status:       {}", settings.status_path.display());
    info!("  Kubeconfig:   {}", settings.kubeconfig_path.display());
    info!("  Artifacts:    {}", settings.output_dir.display());
    info!(
        "  Deadline:     {}s (poll every {}s)",
        settings.polling.overall_timeout.as_secs(),
        settings.polling.poll_interval.as_secs()
    );

    let store = StatusStore::new(&settings.status_path, &settings.kubeconfig_path);
    let spec = match ClusterSpec::parse_file(&spec_path) {
        Ok(spec) => spec,
        Err(e) => {
            let err = BootstrapError::Validation(format!("{:#}", e));
            if !cli.check
                && let Err(write_err) = store.record_early_failure("", &err.to_string()).await
            {
                warn!("Failed to record failure: {:#}", write_err);
            }
            return Err(err);
        }
    };

    if cli.check {
        return check(&spec);
    }

    let collab = Collaborators::from_settings(&settings, &spec)?;
    Orchestrator::new(settings, spec, store, collab)
        .run(shutdown_signal())
        .await
}

fn resolve_settings(cli: &Cli, file_cfg: &BootstrapConfigFile) -> BootstrapSettings {
    let mut settings = BootstrapSettings::from_file(file_cfg);
    if let Some(v) = &cli.status_path {
        settings.status_path = PathBuf::from(v);
    }
    if let Some(v) = &cli.kubeconfig_path {
        settings.kubeconfig_path = PathBuf::from(v);
    }
    if let Some(v) = &cli.output_dir {
        settings.output_dir = PathBuf::from(v);
    }
    if let Some(v) = &cli.manifest_dir {
        settings.manifest_dir = PathBuf::from(v);
    }
    if let Some(v) = &cli.ssh_identity {
        settings.ssh.identity = Some(PathBuf::from(v));
    }
    if let Some(v) = cli.timeout {
        settings.polling.overall_timeout = Duration::from_secs(v);
    }
    if let Some(v) = cli.poll_interval {
        settings.polling.poll_interval = Duration::from_secs(v.max(1));
    }
    settings
}

fn check(spec: &ClusterSpec) -> Result<(), BootstrapError> {
    spec.validate()
        .map_err(|e| BootstrapError::Validation(format!("{:#}", e)))?;
    let plan = install_order(spec)?;
    println!(
        "Cluster {}: {} controllers, {} workers",
        spec.name,
        spec.controllers.len(),
        spec.workers.len()
    );
    if plan.is_empty() {
        println!("No add-ons enabled");
    }
    for (i, addon) in plan.iter().enumerate() {
        println!("  {}. {}", i + 1, addon.name);
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
