use anyhow::Context;
use chrono::Utc;
use pkg_types::cluster::ClusterSpec;
use pkg_types::status::{AddonState, BootstrapStatus, NodeState, Phase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Partial update of the top-level status fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub phase: Option<Phase>,
    pub message: Option<String>,
}

impl StatusPatch {
    pub fn phase(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            message: Some(message.into()),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            phase: None,
            message: Some(message.into()),
        }
    }
}

/// Status document persisted as a single JSON file.
///
/// One process writes, any number of processes read. Every write goes to a
/// temporary file in the same directory and is renamed over the canonical
/// path, so readers see either the old or the new document and never a
/// truncated one. Readers take no locks.
#[derive(Clone)]
pub struct StatusStore {
    path: PathBuf,
    kubeconfig_path: PathBuf,
    /// Serializes read-modify-write cycles inside this process.
    write_lock: Arc<Mutex<()>>,
}

impl StatusStore {
    /// `kubeconfig_path` is checked on every phase change to derive `kubeconfig_ready`.
    pub fn new(path: impl Into<PathBuf>, kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kubeconfig_path: kubeconfig_path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    /// Read the document at `path`. A missing file means no run has started yet.
    pub async fn read(path: &Path) -> anyhow::Result<BootstrapStatus> {
        let data = match tokio::fs::read(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BootstrapStatus::idle());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        serde_json::from_slice(&data)
            .with_context(|| format!("corrupt status document {}", path.display()))
    }

    /// Current document of this store.
    pub async fn load(&self) -> anyhow::Result<BootstrapStatus> {
        Self::read(&self.path).await
    }

    /// Start a new run: replaces whatever a previous run left behind.
    /// `addons` must already be the enabled subset in install order.
    pub async fn init(&self, spec: &ClusterSpec, addons: &[&str]) -> anyhow::Result<BootstrapStatus> {
        let _guard = self.write_lock.lock().await;
        let mut status = BootstrapStatus::for_run(
            uuid::Uuid::new_v4().to_string(),
            spec,
            addons,
            Utc::now(),
        );
        status.kubeconfig_ready = self.kubeconfig_present();
        self.write(&status).await?;
        info!(
            "Status initialized at {} (run {}, {} nodes, {} add-ons)",
            self.path.display(),
            status.run_id,
            status.nodes.len(),
            status.addons.len()
        );
        Ok(status)
    }

    /// Record a run that failed before `init`, so readers see the failure
    /// instead of a stale or idle document.
    pub async fn record_early_failure(
        &self,
        cluster_name: &str,
        message: &str,
    ) -> anyhow::Result<BootstrapStatus> {
        let now = Utc::now();
        let status = BootstrapStatus {
            run_id: uuid::Uuid::new_v4().to_string(),
            cluster_name: cluster_name.to_string(),
            phase: Phase::Error,
            message: message.to_string(),
            started_at: Some(now),
            updated_at: Some(now),
            completed_at: Some(now),
            kubeconfig_ready: false,
            ..Default::default()
        };
        self.replace(&status).await?;
        Ok(status)
    }

    /// Overwrite the whole document.
    pub async fn replace(&self, status: &BootstrapStatus) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(status).await
    }

    /// Update phase and/or message. Entering a terminal phase stamps
    /// `completed_at`; any phase change re-derives `kubeconfig_ready`.
    pub async fn set(&self, patch: StatusPatch) -> anyhow::Result<BootstrapStatus> {
        let kubeconfig_ready = self.kubeconfig_present();
        self.update(move |status| {
            if let Some(phase) = patch.phase {
                if phase != status.phase {
                    status.phase = phase;
                    status.kubeconfig_ready = kubeconfig_ready;
                }
                if phase.is_terminal() {
                    status.completed_at = Some(Utc::now());
                }
            }
            if let Some(message) = patch.message {
                status.message = message;
            }
        })
        .await
    }

    /// Update one node by name. Unknown names are ignored.
    pub async fn set_node(
        &self,
        name: &str,
        state: NodeState,
        message: impl Into<String>,
    ) -> anyhow::Result<()> {
        let message = message.into();
        self.update(|status| match status.nodes.iter_mut().find(|n| n.name == name) {
            Some(node) => {
                node.status = state;
                node.message = message;
            }
            None => warn!("set_node: no node named {} in status", name),
        })
        .await?;
        Ok(())
    }

    /// Update one add-on by name. Unknown names are ignored.
    pub async fn set_addon(
        &self,
        name: &str,
        state: AddonState,
        message: impl Into<String>,
    ) -> anyhow::Result<()> {
        let message = message.into();
        self.update(|status| match status.addons.iter_mut().find(|a| a.name == name) {
            Some(addon) => {
                addon.status = state;
                addon.message = message;
            }
            None => warn!("set_addon: no add-on named {} in status", name),
        })
        .await?;
        Ok(())
    }

    /// Re-derive `kubeconfig_ready` from the credential file right now.
    pub async fn refresh_kubeconfig(&self) -> anyhow::Result<bool> {
        let ready = self.kubeconfig_present();
        self.update(|status| status.kubeconfig_ready = ready).await?;
        Ok(ready)
    }

    /// Move a credential left by an earlier run to `<name>.previous`, so
    /// `kubeconfig_ready` only ever reflects this run's retrieval.
    pub async fn retire_kubeconfig(&self) -> anyhow::Result<Option<PathBuf>> {
        if !self.kubeconfig_present() {
            return Ok(None);
        }
        let mut name = self
            .kubeconfig_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "kubeconfig".into());
        name.push(".previous");
        let retired = self.kubeconfig_path.with_file_name(name);
        tokio::fs::rename(&self.kubeconfig_path, &retired)
            .await
            .with_context(|| {
                format!(
                    "failed to move stale credential {} aside",
                    self.kubeconfig_path.display()
                )
            })?;
        warn!(
            "Moved credential from an earlier run to {}",
            retired.display()
        );
        Ok(Some(retired))
    }

    fn kubeconfig_present(&self) -> bool {
        self.kubeconfig_path.is_file()
    }

    async fn update<F>(&self, apply: F) -> anyhow::Result<BootstrapStatus>
    where
        F: FnOnce(&mut BootstrapStatus),
    {
        let _guard = self.write_lock.lock().await;
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("status not initialized at {}", self.path.display()))?;
        let mut status: BootstrapStatus = serde_json::from_slice(&data)
            .with_context(|| format!("corrupt status document {}", self.path.display()))?;
        apply(&mut status);
        status.updated_at = Some(Utc::now());
        self.write(&status).await?;
        Ok(status)
    }

    /// Write to a sibling temp file, fsync, then rename over the canonical path.
    async fn write(&self, status: &BootstrapStatus) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "status.json".to_string());
        let tmp = dir.join(format!(".{}.tmp.{}", file_name, std::process::id()));

        let data = serde_json::to_vec_pretty(status)?;
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("failed to replace {}", self.path.display()));
        }
        debug!("Wrote status phase={} to {}", status.phase, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::status::NodeRole;

    const SPEC: &str = r#"
name: lab
control-plane-vip: 10.0.0.10
kubernetes-version: v1.30.2
pod-cidr: 10.244.0.0/16
service-cidr: 10.96.0.0/12
controllers:
  - { name: cp-1, ip: 10.0.0.11, mac: "52:54:00:00:00:11" }
workers:
  - { name: worker-1, ip: 10.0.0.21, mac: "52:54:00:00:00:21" }
  - { name: worker-2, ip: 10.0.0.22, mac: "52:54:00:00:00:22" }
"#;

    fn spec() -> ClusterSpec {
        ClusterSpec::from_yaml(SPEC).unwrap()
    }

    fn store(dir: &tempfile::TempDir) -> StatusStore {
        StatusStore::new(
            dir.path().join("status.json"),
            dir.path().join("auth/kubeconfig"),
        )
    }

    #[tokio::test]
    async fn missing_document_reads_as_idle() {
        let dir = tempfile::tempdir().unwrap();
        let status = store(&dir).load().await.unwrap();
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.nodes.is_empty());
    }

    #[tokio::test]
    async fn init_populates_nodes_and_addons_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &["metallb", "nebraska"]).await.unwrap();

        let status = store.load().await.unwrap();
        assert_eq!(status.phase, Phase::Generating);
        assert_eq!(status.cluster_name, "lab");
        let names: Vec<_> = status.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["cp-1", "worker-1", "worker-2"]);
        assert_eq!(status.nodes[0].role, NodeRole::Controller);
        assert!(status.nodes.iter().all(|n| n.status == NodeState::Pending));
        let addons: Vec<_> = status.addons.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(addons, ["metallb", "nebraska"]);
        assert!(status.started_at.is_some());
        assert!(status.completed_at.is_none());
    }

    #[tokio::test]
    async fn partial_updates_preserve_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &["cert-manager", "metallb"]).await.unwrap();

        store.set_node("worker-1", NodeState::Ready, "joined").await.unwrap();
        store.set_addon("metallb", AddonState::Deploying, "applying").await.unwrap();
        store
            .set(StatusPatch::phase(Phase::Serving, "PXE services up"))
            .await
            .unwrap();
        store.set_node("ghost", NodeState::Ready, "").await.unwrap();
        store.set_addon("ghost", AddonState::Ready, "").await.unwrap();

        let status = store.load().await.unwrap();
        assert_eq!(status.phase, Phase::Serving);
        assert_eq!(status.message, "PXE services up");
        let names: Vec<_> = status.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["cp-1", "worker-1", "worker-2"]);
        assert_eq!(status.node("worker-1").unwrap().status, NodeState::Ready);
        assert_eq!(status.node("worker-1").unwrap().message, "joined");
        assert_eq!(status.node("cp-1").unwrap().status, NodeState::Pending);
        let addons: Vec<_> = status.addons.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(addons, ["cert-manager", "metallb"]);
        assert_eq!(status.addon("metallb").unwrap().status, AddonState::Deploying);
        assert_eq!(status.addon("cert-manager").unwrap().status, AddonState::Pending);
    }

    #[tokio::test]
    async fn message_only_patch_keeps_phase() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &[]).await.unwrap();
        store.set(StatusPatch::message("still rendering")).await.unwrap();
        let status = store.load().await.unwrap();
        assert_eq!(status.phase, Phase::Generating);
        assert_eq!(status.message, "still rendering");
    }

    #[tokio::test]
    async fn terminal_phase_stamps_completed_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &[]).await.unwrap();
        let status = store
            .set(StatusPatch::phase(Phase::Error, "boom"))
            .await
            .unwrap();
        assert!(status.completed_at.is_some());
        assert_eq!(store.load().await.unwrap().message, "boom");
    }

    #[tokio::test]
    async fn kubeconfig_ready_follows_file_on_phase_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &[]).await.unwrap();
        assert!(!store.load().await.unwrap().kubeconfig_ready);

        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("auth/kubeconfig"), "apiVersion: v1\n").unwrap();

        // Not a phase change: flag untouched.
        store.set(StatusPatch::message("fetched")).await.unwrap();
        assert!(!store.load().await.unwrap().kubeconfig_ready);

        store
            .set(StatusPatch::phase(Phase::Serving, "serving"))
            .await
            .unwrap();
        assert!(store.load().await.unwrap().kubeconfig_ready);
    }

    #[tokio::test]
    async fn early_failure_replaces_stale_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &["metallb"]).await.unwrap();
        store
            .record_early_failure("lab", "invalid cluster spec: no controllers")
            .await
            .unwrap();
        let status = store.load().await.unwrap();
        assert_eq!(status.phase, Phase::Error);
        assert_eq!(status.cluster_name, "lab");
        assert!(status.nodes.is_empty() && status.addons.is_empty());
        assert!(status.completed_at.is_some());
    }

    #[tokio::test]
    async fn refresh_kubeconfig_without_phase_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &[]).await.unwrap();
        assert!(!store.refresh_kubeconfig().await.unwrap());

        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("auth/kubeconfig"), "apiVersion: v1\n").unwrap();
        assert!(store.refresh_kubeconfig().await.unwrap());
        let status = store.load().await.unwrap();
        assert!(status.kubeconfig_ready);
        assert_eq!(status.phase, Phase::Generating);
    }

    #[tokio::test]
    async fn stale_credential_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.retire_kubeconfig().await.unwrap().is_none());

        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("auth/kubeconfig"), "old cluster\n").unwrap();
        let retired = store.retire_kubeconfig().await.unwrap().unwrap();
        assert_eq!(retired, dir.path().join("auth/kubeconfig.previous"));
        assert_eq!(std::fs::read_to_string(&retired).unwrap(), "old cluster\n");
        assert!(!dir.path().join("auth/kubeconfig").exists());

        store.init(&spec(), &[]).await.unwrap();
        assert!(!store.load().await.unwrap().kubeconfig_ready);
    }

    #[tokio::test]
    async fn early_failure_never_claims_a_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("auth/kubeconfig"), "old cluster\n").unwrap();
        let status = store.record_early_failure("", "bad spec").await.unwrap();
        assert!(!status.kubeconfig_ready);
    }

    #[tokio::test]
    async fn init_replaces_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let first = store.init(&spec(), &["metallb"]).await.unwrap();
        store
            .set(StatusPatch::phase(Phase::Error, "failed"))
            .await
            .unwrap();

        let second = store.init(&spec(), &[]).await.unwrap();
        assert_ne!(first.run_id, second.run_id);
        let status = store.load().await.unwrap();
        assert_eq!(status.phase, Phase::Generating);
        assert!(status.addons.is_empty());
        assert!(status.completed_at.is_none());
    }

    #[tokio::test]
    async fn update_before_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            store(&dir)
                .set_node("cp-1", NodeState::Ready, "")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "{\"phase\": ").unwrap();
        assert!(StatusStore::read(&path).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_reader_never_sees_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.init(&spec(), &["cert-manager"]).await.unwrap();
        let path = store.path().to_path_buf();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let state = if i % 2 == 0 {
                        NodeState::Installing
                    } else {
                        NodeState::Ready
                    };
                    store
                        .set_node("worker-2", state, format!("iteration {}", i))
                        .await
                        .unwrap();
                }
            })
        };

        let reader = tokio::spawn(async move {
            let mut reads = 0;
            loop {
                let status = StatusStore::read(&path).await.unwrap();
                assert_eq!(status.nodes.len(), 3);
                assert_eq!(status.addons.len(), 1);
                reads += 1;
                if status
                    .node("worker-2")
                    .is_some_and(|n| n.message == "iteration 199")
                {
                    return reads;
                }
                tokio::task::yield_now().await;
            }
        });

        writer.await.unwrap();
        assert!(reader.await.unwrap() > 0);
    }
}
