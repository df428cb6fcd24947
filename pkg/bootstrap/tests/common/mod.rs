#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use pkg_bootstrap::cluster::{ClusterClient, ManifestSource, NodeSource, ObservedNode, Workload};
use pkg_bootstrap::credentials::CredentialFetcher;
use pkg_bootstrap::probe::ControlPlaneProbe;
use pkg_bootstrap::render::ArtifactRenderer;
use pkg_bootstrap::settings::{AddonSettings, PollSettings, ServiceSettings};
use pkg_bootstrap::{BootstrapSettings, Collaborators};
use pkg_state::StatusStore;
use pkg_types::cluster::{ClusterSpec, NodeSpec};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn cluster_spec(workers: usize, addons: &str) -> ClusterSpec {
    let mut yaml = String::from(
        r#"
name: lab
control-plane-vip: 10.0.0.10
kubernetes-version: v1.30.2
pod-cidr: 10.244.0.0/16
service-cidr: 10.96.0.0/12
controllers:
  - { name: cp-1, ip: 10.0.0.11, mac: "52:54:00:00:00:11" }
workers:
"#,
    );
    if workers == 0 {
        yaml = yaml.replace("workers:\n", "workers: []\n");
    }
    for i in 1..=workers {
        yaml.push_str(&format!(
            "  - {{ name: worker-{i}, ip: 10.0.0.{}, mac: \"52:54:00:00:00:{:02}\" }}\n",
            20 + i,
            20 + i
        ));
    }
    yaml.push_str(addons);
    // Unvalidated: rejecting bad specs is the orchestrator's job.
    serde_yaml::from_str(&yaml).unwrap()
}

pub struct RecordingRenderer {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ArtifactRenderer for RecordingRenderer {
    async fn render(&self, _spec: &ClusterSpec, out_dir: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("template error: undefined variable 'ignition_url'");
        }
        std::fs::create_dir_all(out_dir)?;
        std::fs::write(out_dir.join("dnsmasq.conf"), "port=0\n")?;
        Ok(())
    }
}

pub struct StaticProbe {
    pub healthy: bool,
}

#[async_trait]
impl ControlPlaneProbe for StaticProbe {
    async fn check(&self, _endpoint: &str) -> Result<bool> {
        Ok(self.healthy)
    }
}

/// Reports every node in the spec, all ready or all not.
pub struct AllNodes {
    pub names: Vec<String>,
    pub ready: bool,
}

#[async_trait]
impl NodeSource for AllNodes {
    async fn list_nodes(&self) -> Result<Vec<ObservedNode>> {
        Ok(self
            .names
            .iter()
            .map(|name| ObservedNode {
                name: name.clone(),
                addresses: vec![],
                ready: self.ready,
            })
            .collect())
    }
}

pub struct Fetcher {
    pub succeed: bool,
}

#[async_trait]
impl CredentialFetcher for Fetcher {
    async fn fetch(&self, controller: &NodeSpec, dest: &Path) -> Result<()> {
        if !self.succeed {
            bail!("Permission denied (publickey) for {}", controller.ip);
        }
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::write(dest, "apiVersion: v1\n")?;
        Ok(())
    }
}

/// Records every call. When nebraska is applied, also records the state
/// metallb had in the status document at that moment.
pub struct FakeCluster {
    pub status_path: PathBuf,
    pub ceph_health: &'static str,
    pub events: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn apply(&self, manifest: &ManifestSource, _timeout: Duration) -> Result<()> {
        let label = manifest.to_string();
        if label.contains("nebraska") {
            let status = StatusStore::read(&self.status_path).await?;
            let metallb = status
                .addon("metallb")
                .map(|a| a.status.to_string())
                .unwrap_or_default();
            self.events
                .lock()
                .unwrap()
                .push(format!("metallb was {} when nebraska applied", metallb));
        }
        self.events.lock().unwrap().push(format!("apply {}", label));
        Ok(())
    }

    async fn rollout_status(&self, workload: &Workload, _timeout: Duration) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("rollout {}", workload));
        Ok(())
    }

    async fn exec(
        &self,
        _namespace: &str,
        _target: &str,
        command: &[&str],
        _timeout: Duration,
    ) -> Result<String> {
        self.events
            .lock()
            .unwrap()
            .push(format!("exec {}", command.join(" ")));
        Ok(self.ceph_health.to_string())
    }
}

/// One test's workspace: settings pointing into a temp dir, with PXE
/// services that record their pids.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub settings: BootstrapSettings,
    pub store: StatusStore,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut settings = BootstrapSettings::default();
        settings.status_path = root.join("status.json");
        settings.kubeconfig_path = root.join("auth/kubeconfig");
        settings.output_dir = root.join("generated");
        settings.manifest_dir = root.join("manifests");
        settings.boot_server = pid_recording(root, "boot-server", "exec sleep 300");
        settings.dhcp_server = Some(pid_recording(root, "dhcp", "exec sleep 300"));
        settings.polling = PollSettings {
            overall_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(20),
            credential_attempts: 3,
        };
        settings.addons = AddonSettings {
            apply_timeout: Duration::from_secs(5),
            rollout_timeout: Duration::from_secs(5),
            ceph_health_timeout: Duration::from_millis(300),
            ceph_health_interval: Duration::from_millis(20),
        };
        settings.services = ServiceSettings {
            startup_grace: Duration::from_millis(150),
            stop_grace: Duration::from_secs(2),
        };
        let store = StatusStore::new(&settings.status_path, &settings.kubeconfig_path);
        Self {
            dir,
            settings,
            store,
        }
    }

    pub fn pid(&self, service: &str) -> Option<i32> {
        std::fs::read_to_string(self.dir.path().join(format!("{}.pid", service)))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn cluster(&self, ceph_health: &'static str) -> Arc<FakeCluster> {
        Arc::new(FakeCluster {
            status_path: self.settings.status_path.clone(),
            ceph_health,
            events: Mutex::new(vec![]),
        })
    }
}

/// `sh -c` that writes its pid to `<dir>/<name>.pid` and then runs `script`.
pub fn pid_recording(dir: &Path, name: &str, script: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo $$ > {}/{}.pid; {}", dir.display(), name, script),
    ]
}

pub fn alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

pub struct Mocks {
    pub renderer: Arc<RecordingRenderer>,
    pub cluster: Arc<FakeCluster>,
}

/// Collaborators for a cluster where everything eventually works, with
/// per-test knobs for the parts that should not.
pub fn collaborators(
    spec: &ClusterSpec,
    cluster: Arc<FakeCluster>,
    healthy: bool,
    nodes_ready: bool,
    credential: bool,
    render_fails: bool,
) -> (Collaborators, Mocks) {
    let renderer = Arc::new(RecordingRenderer {
        fail: render_fails,
        calls: AtomicUsize::new(0),
    });
    let collab = Collaborators {
        renderer: renderer.clone(),
        probe: Arc::new(StaticProbe { healthy }),
        nodes: Arc::new(AllNodes {
            names: spec.nodes().map(|(n, _)| n.name.clone()).collect(),
            ready: nodes_ready,
        }),
        credentials: Arc::new(Fetcher {
            succeed: credential,
        }),
        cluster: cluster.clone(),
    };
    (collab, Mocks { renderer, cluster })
}
