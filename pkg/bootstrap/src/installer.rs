//! The `installing_addons` phase.

use pkg_state::{StatusPatch, StatusStore};
use pkg_types::cluster::ClusterSpec;
use pkg_types::status::AddonState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::addons::{self, AddonSpec, ReadinessProbe};
use crate::cluster::{ClusterClient, ManifestSource};
use crate::error::BootstrapError;
use crate::health::Deadline;
use crate::settings::AddonSettings;

const TOOLBOX: &str = "deploy/rook-ceph-tools";
const PROBE_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Installs enabled add-ons one at a time, in dependency order. The first
/// failure marks that add-on `error` and stops the sequence.
pub struct AddonInstaller {
    client: Arc<dyn ClusterClient>,
    store: StatusStore,
    settings: AddonSettings,
    manifest_dir: PathBuf,
}

impl AddonInstaller {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        store: StatusStore,
        settings: AddonSettings,
        manifest_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            manifest_dir,
        }
    }

    pub async fn run(
        &self,
        spec: &ClusterSpec,
        plan: &[&'static AddonSpec],
    ) -> Result<(), BootstrapError> {
        if plan.is_empty() {
            info!("No add-ons enabled");
            return Ok(());
        }
        let kubeconfig = self.store.kubeconfig_path();
        if !kubeconfig.is_file() {
            return Err(BootstrapError::MissingCredential(
                kubeconfig.display().to_string(),
            ));
        }

        for (i, addon) in plan.iter().enumerate() {
            info!("Installing add-on {} ({}/{})", addon.name, i + 1, plan.len());
            self.store
                .set(StatusPatch::message(format!(
                    "Installing add-on {} ({}/{})",
                    addon.name,
                    i + 1,
                    plan.len()
                )))
                .await?;
            self.store
                .set_addon(addon.name, AddonState::Deploying, "Applying manifests")
                .await?;

            if let Err(e) = self.install(spec, addon).await {
                warn!("Add-on {} failed: {}", addon.name, e);
                if let Err(write_err) = self
                    .store
                    .set_addon(addon.name, AddonState::Error, e.to_string())
                    .await
                {
                    warn!("Failed to record {} failure: {:#}", addon.name, write_err);
                }
                return Err(e);
            }

            self.store
                .set_addon(addon.name, AddonState::Ready, "Ready")
                .await?;
            info!("Add-on {} ready", addon.name);
        }
        Ok(())
    }

    async fn install(&self, spec: &ClusterSpec, addon: &AddonSpec) -> Result<(), BootstrapError> {
        let ctx = addon.context(spec, &self.manifest_dir);
        info!("{} version {}", addon.name, ctx.version);

        for manifest in (addon.manifests)(&ctx) {
            self.apply(addon, &manifest).await?;
        }

        for workload in addon.workloads() {
            self.store
                .set_addon(
                    addon.name,
                    AddonState::Deploying,
                    format!("Waiting for {}", workload),
                )
                .await?;
            self.client
                .rollout_status(&workload, self.settings.rollout_timeout)
                .await
                .map_err(|e| BootstrapError::RolloutTimeout {
                    addon: addon.name.to_string(),
                    workload: workload.to_string(),
                    reason: format!("{:#}", e),
                })?;
        }

        if let Some(probe) = addon.probe {
            self.store
                .set_addon(addon.name, AddonState::Deploying, "Waiting for health probe")
                .await?;
            self.run_probe(addon, probe).await?;
        }

        if let Some(post_ready) = addon.post_ready {
            let manifest = post_ready(&ctx).map_err(|e| BootstrapError::Apply {
                addon: addon.name.to_string(),
                reason: format!("{:#}", e),
            })?;
            self.store
                .set_addon(
                    addon.name,
                    AddonState::Deploying,
                    format!("Applying {}", manifest),
                )
                .await?;
            self.apply(addon, &manifest).await?;
        }
        Ok(())
    }

    /// Applied once; a failed apply is never retried.
    async fn apply(&self, addon: &AddonSpec, manifest: &ManifestSource) -> Result<(), BootstrapError> {
        info!("Applying {} for {}", manifest, addon.name);
        self.client
            .apply(manifest, self.settings.apply_timeout)
            .await
            .map_err(|e| BootstrapError::Apply {
                addon: addon.name.to_string(),
                reason: format!("{}: {:#}", manifest, e),
            })
    }

    async fn run_probe(&self, addon: &AddonSpec, probe: ReadinessProbe) -> Result<(), BootstrapError> {
        let (timeout, interval) = addons::probe_timing(probe, &self.settings);
        let deadline = Deadline::start(timeout);
        let mut last = String::new();
        loop {
            let result = match probe {
                ReadinessProbe::CephHealth => self
                    .client
                    .exec(addon.namespace, TOOLBOX, &["ceph", "health"], PROBE_COMMAND_TIMEOUT)
                    .await
                    .map(|out| (addons::ceph_healthy(&out), out)),
            };
            match result {
                Ok((true, _)) => {
                    info!(
                        "{} healthy after {}s",
                        addon.name,
                        deadline.elapsed().as_secs()
                    );
                    return Ok(());
                }
                Ok((false, out)) => last = out.trim().to_string(),
                Err(e) => last = format!("{:#}", e),
            }
            info!(
                "{} not healthy yet ({}s elapsed): {}",
                addon.name,
                deadline.elapsed().as_secs(),
                last
            );
            if deadline.expired() {
                return Err(BootstrapError::ProbeFailure {
                    addon: addon.name.to_string(),
                    reason: format!(
                        "not healthy after {}s, last result: {}",
                        deadline.elapsed().as_secs(),
                        last
                    ),
                });
            }
            deadline.pause(interval).await;
        }
    }
}
