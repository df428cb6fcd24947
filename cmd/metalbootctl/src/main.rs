use clap::{Parser, Subcommand};
use pkg_constants::network;
use pkg_types::status::{BootstrapStatus, Phase};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "metalbootctl", about = "Inspect a running metalboot bootstrap")]
struct Cli {
    /// Dashboard API endpoint
    #[arg(long, default_value = network::DEFAULT_DASHBOARD_ADDR)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current bootstrap status
    Status,
    /// Follow the bootstrap until it completes or fails
    Watch {
        /// Seconds between polls
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let url = format!("{}/api/v1/status", cli.server.trim_end_matches('/'));

    match cli.command {
        Commands::Status => {
            info!("Querying status from {}", url);
            let status = fetch(&client, &url).await?;
            print!("{}", render(&status));
            Ok(exit_for(status.phase))
        }
        Commands::Watch { interval } => {
            let mut last: Option<BootstrapStatus> = None;
            loop {
                let status = fetch(&client, &url).await?;
                if last.as_ref() != Some(&status) {
                    println!("--- {}", chrono::Local::now().format("%H:%M:%S"));
                    print!("{}", render(&status));
                }
                if status.phase.is_terminal() {
                    return Ok(exit_for(status.phase));
                }
                last = Some(status);
                tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
            }
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> anyhow::Result<BootstrapStatus> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        let code = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("server returned {}: {}", code, body.trim());
    }
    Ok(resp.json().await?)
}

fn exit_for(phase: Phase) -> ExitCode {
    if phase == Phase::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn render(status: &BootstrapStatus) -> String {
    let mut out = String::new();
    let cluster = if status.cluster_name.is_empty() {
        "-"
    } else {
        status.cluster_name.as_str()
    };
    out.push_str(&format!("Cluster:     {}\n", cluster));
    out.push_str(&format!("Phase:       {}\n", status.phase));
    out.push_str(&format!("Message:     {}\n", status.message));
    out.push_str(&format!(
        "Kubeconfig:  {}\n",
        if status.kubeconfig_ready { "ready" } else { "not ready" }
    ));
    if let Some(started) = status.started_at {
        let end = status.completed_at.unwrap_or_else(chrono::Utc::now);
        out.push_str(&format!(
            "Elapsed:     {}s\n",
            (end - started).num_seconds().max(0)
        ));
    }

    if !status.nodes.is_empty() {
        out.push_str(&format!(
            "\n{:<20} {:<16} {:<11} {:<12} {}\n",
            "NODE", "IP", "ROLE", "STATUS", "MESSAGE"
        ));
        for node in &status.nodes {
            out.push_str(&format!(
                "{:<20} {:<16} {:<11} {:<12} {}\n",
                node.name,
                node.ip,
                node.role.to_string(),
                node.status.to_string(),
                node.message
            ));
        }
    }

    if !status.addons.is_empty() {
        out.push_str(&format!("\n{:<14} {:<10} {}\n", "ADDON", "STATUS", "MESSAGE"));
        for addon in &status.addons {
            out.push_str(&format!(
                "{:<14} {:<10} {}\n",
                addon.name,
                addon.status.to_string(),
                addon.message
            ));
        }
    }
    out
}
