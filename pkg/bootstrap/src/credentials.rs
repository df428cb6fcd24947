use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use pkg_constants::network::REMOTE_ADMIN_KUBECONFIG;
use pkg_types::cluster::NodeSpec;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::exec;

/// How to reach nodes over SSH.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub program: String,
    pub user: String,
    pub identity: Option<PathBuf>,
}

impl SshTarget {
    /// Arguments for running `remote` on `host`, non-interactively.
    pub fn args(&self, host: IpAddr, remote: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
        ];
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push(format!("{}@{}", self.user, host));
        args.extend(remote.iter().map(|s| s.to_string()));
        args
    }
}

/// Retrieves the cluster admin credential from a controller node.
#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    /// Fetch the credential from `controller` and persist it at `dest`.
    async fn fetch(&self, controller: &NodeSpec, dest: &Path) -> Result<()>;
}

/// Reads the admin kubeconfig with `sudo cat` over SSH.
pub struct SshCredentialFetcher {
    ssh: SshTarget,
    timeout: Duration,
}

impl SshCredentialFetcher {
    pub fn new(ssh: SshTarget) -> Self {
        Self {
            ssh,
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl CredentialFetcher for SshCredentialFetcher {
    async fn fetch(&self, controller: &NodeSpec, dest: &Path) -> Result<()> {
        let args = self
            .ssh
            .args(controller.ip, &["sudo", "cat", REMOTE_ADMIN_KUBECONFIG]);
        let out = exec::run(&self.ssh.program, &args, None, self.timeout)
            .await
            .with_context(|| format!("failed to read credential from {}", controller.name))?;
        if out.stdout.trim().is_empty() {
            bail!("{} returned an empty credential", controller.name);
        }
        write_private_file(dest, out.stdout.as_bytes()).await?;
        info!("Credential from {} saved to {}", controller.name, dest.display());
        Ok(())
    }
}

/// Atomically write `data` to `dest` with owner-only permissions.
pub async fn write_private_file(dest: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = dest.parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let tmp = dest.with_extension(format!("tmp.{}", std::process::id()));
    // A leftover temp file would keep its old mode through a truncating open.
    match tokio::fs::remove_file(&tmp).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(e).with_context(|| format!("failed to remove {}", tmp.display()));
        }
        _ => {}
    }
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options
        .open(&tmp)
        .await
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    file.write_all(data)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("failed to move credential to {}", dest.display()))?;
    Ok(())
}
