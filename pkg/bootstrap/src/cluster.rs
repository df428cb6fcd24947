use anyhow::{Context, Result};
use async_trait::async_trait;
use pkg_constants::{addons::FIELD_MANAGER, network};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::credentials::SshTarget;
use crate::exec;

/// Where a set of manifests comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// Remote manifest, fetched by the apply tool.
    Url(String),
    /// Manifest file on the bootstrap node.
    Path(PathBuf),
    /// Generated YAML fed through stdin.
    Inline { name: String, yaml: String },
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestSource::Url(url) => write!(f, "{}", url),
            ManifestSource::Path(path) => write!(f, "{}", path.display()),
            ManifestSource::Inline { name, .. } => write!(f, "inline:{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "deployment"),
            WorkloadKind::DaemonSet => write!(f, "daemonset"),
            WorkloadKind::StatefulSet => write!(f, "statefulset"),
        }
    }
}

/// A named workload whose rollout is awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} -n {}", self.kind, self.name, self.namespace)
    }
}

/// A node as registered in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedNode {
    pub name: String,
    pub addresses: Vec<String>,
    pub ready: bool,
}

/// Applies resources to, and inspects workloads in, the new cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Apply manifests. Never retried by callers.
    async fn apply(&self, manifest: &ManifestSource, timeout: Duration) -> Result<()>;

    /// Block until `workload` has rolled out or `timeout` passes.
    async fn rollout_status(&self, workload: &Workload, timeout: Duration) -> Result<()>;

    /// Run a command in `target` (e.g. `deploy/rook-ceph-tools`) and return stdout.
    async fn exec(
        &self,
        namespace: &str,
        target: &str,
        command: &[&str],
        timeout: Duration,
    ) -> Result<String>;
}

/// Lists the nodes registered with the control plane.
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ObservedNode>>;
}

// ─── kubectl ────────────────────────────────────────────────────

/// kubectl-backed client using the retrieved admin credential.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl: String,
    kubeconfig: PathBuf,
}

const NODE_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack added on top of kubectl's own `--timeout`.
const KUBECTL_GRACE: Duration = Duration::from_secs(15);

impl KubectlClient {
    pub fn new(kubectl: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    pub fn kubeconfig(&self) -> &std::path::Path {
        &self.kubeconfig
    }

    fn args(&self, rest: &[&str]) -> Vec<String> {
        let mut args = vec![
            "--kubeconfig".to_string(),
            self.kubeconfig.to_string_lossy().to_string(),
        ];
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn apply(&self, manifest: &ManifestSource, timeout: Duration) -> Result<()> {
        let field_manager = format!("--field-manager={}", FIELD_MANAGER);
        let timeout_flag = format!("--timeout={}s", timeout.as_secs());
        let mut rest = vec!["apply", "--server-side", field_manager.as_str(), timeout_flag.as_str()];

        let (target, stdin) = match manifest {
            ManifestSource::Url(url) => (url.clone(), None),
            ManifestSource::Path(path) => (path.to_string_lossy().to_string(), None),
            ManifestSource::Inline { yaml, .. } => ("-".to_string(), Some(yaml.as_bytes())),
        };
        rest.extend(["-f", target.as_str()]);

        let out = exec::run(&self.kubectl, &self.args(&rest), stdin, timeout + KUBECTL_GRACE)
            .await
            .with_context(|| format!("kubectl apply {}", manifest))?;
        debug!("apply {}: {}", manifest, out.stdout.trim());
        Ok(())
    }

    async fn rollout_status(&self, workload: &Workload, timeout: Duration) -> Result<()> {
        let target = format!("{}/{}", workload.kind, workload.name);
        let timeout_flag = format!("--timeout={}s", timeout.as_secs());
        let rest = [
            "rollout",
            "status",
            target.as_str(),
            "-n",
            workload.namespace.as_str(),
            timeout_flag.as_str(),
        ];
        exec::run(&self.kubectl, &self.args(&rest), None, timeout + KUBECTL_GRACE).await?;
        Ok(())
    }

    async fn exec(
        &self,
        namespace: &str,
        target: &str,
        command: &[&str],
        timeout: Duration,
    ) -> Result<String> {
        let mut rest = vec!["-n", namespace, "exec", target, "--"];
        rest.extend_from_slice(command);
        let out = exec::run(&self.kubectl, &self.args(&rest), None, timeout).await?;
        Ok(out.stdout)
    }
}

#[async_trait]
impl NodeSource for KubectlClient {
    async fn list_nodes(&self) -> Result<Vec<ObservedNode>> {
        let out = exec::run(
            &self.kubectl,
            &self.args(&["get", "nodes", "-o", "json"]),
            None,
            NODE_QUERY_TIMEOUT,
        )
        .await?;
        parse_node_list(&out.stdout)
    }
}

/// Runs kubectl on a controller over SSH with the controller's own admin
/// credential. Used while the credential has not been copied locally yet.
#[derive(Debug, Clone)]
pub struct SshNodeSource {
    ssh: SshTarget,
    host: IpAddr,
}

impl SshNodeSource {
    pub fn new(ssh: SshTarget, host: IpAddr) -> Self {
        Self { ssh, host }
    }
}

#[async_trait]
impl NodeSource for SshNodeSource {
    async fn list_nodes(&self) -> Result<Vec<ObservedNode>> {
        let kubeconfig = format!("--kubeconfig={}", network::REMOTE_ADMIN_KUBECONFIG);
        let args = self.ssh.args(
            self.host,
            &["sudo", "kubectl", kubeconfig.as_str(), "get", "nodes", "-o", "json"],
        );
        let out = exec::run(&self.ssh.program, &args, None, NODE_QUERY_TIMEOUT).await?;
        parse_node_list(&out.stdout)
    }
}

/// Queries locally once the credential exists, remotely until then.
pub struct PreferLocalNodes {
    pub local: KubectlClient,
    pub remote: SshNodeSource,
}

#[async_trait]
impl NodeSource for PreferLocalNodes {
    async fn list_nodes(&self) -> Result<Vec<ObservedNode>> {
        if self.local.kubeconfig().is_file() {
            self.local.list_nodes().await
        } else {
            self.remote.list_nodes().await
        }
    }
}

/// Parse `kubectl get nodes -o json`. A node is ready when its `Ready`
/// condition has status `True`.
pub fn parse_node_list(json: &str) -> Result<Vec<ObservedNode>> {
    let doc: serde_json::Value = serde_json::from_str(json).context("node list is not JSON")?;
    let items = doc["items"].as_array().cloned().unwrap_or_default();

    Ok(items
        .iter()
        .filter_map(|item| {
            let name = item["metadata"]["name"].as_str()?.to_string();
            let addresses = item["status"]["addresses"]
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter_map(|a| a["address"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let ready = item["status"]["conditions"]
                .as_array()
                .map(|conds| {
                    conds
                        .iter()
                        .any(|c| c["type"] == "Ready" && c["status"] == "True")
                })
                .unwrap_or(false);
            Some(ObservedNode {
                name,
                addresses,
                ready,
            })
        })
        .collect())
}
