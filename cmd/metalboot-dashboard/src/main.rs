use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::{network, paths};
use pkg_types::config::{BootstrapConfigFile, load_config_file};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "metalboot-dashboard",
    about = "Serve the bootstrap status document over HTTP"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = paths::DEFAULT_CONFIG)]
    config: String,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Status document written by metalboot
    #[arg(long)]
    status_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    // Shares the bootstrap process's config file.
    let file_cfg: BootstrapConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli
        .port
        .or(file_cfg.dashboard_port)
        .unwrap_or(network::DEFAULT_DASHBOARD_PORT);
    let status_path = cli
        .status_path
        .or(file_cfg.status_path)
        .unwrap_or_else(|| paths::DEFAULT_STATUS_PATH.to_string());

    let config = ServerConfig {
        addr: SocketAddr::new(cli.bind, port),
        status_path: PathBuf::from(status_path),
    };
    start_server(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}
