//! The bootstrap phase state machine.
//!
//! `idle → generating → serving → waiting → installing_addons → complete`,
//! with any live phase able to fail into `error`. The orchestrator owns the
//! PXE services for the whole run and always stops them before returning.

use pkg_state::{StatusPatch, StatusStore};
use pkg_types::cluster::ClusterSpec;
use pkg_types::status::{AddonState, Phase};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::addons::{self, AddonSpec};
use crate::cluster::{ClusterClient, KubectlClient, NodeSource, PreferLocalNodes, SshNodeSource};
use crate::credentials::{CredentialFetcher, SshCredentialFetcher};
use crate::error::BootstrapError;
use crate::health::HealthPoller;
use crate::installer::AddonInstaller;
use crate::probe::{ControlPlaneProbe, HttpProbe};
use crate::pxe::PxeServices;
use crate::render::{ArtifactRenderer, CommandRenderer};
use crate::settings::BootstrapSettings;

/// External systems the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn ArtifactRenderer>,
    pub probe: Arc<dyn ControlPlaneProbe>,
    pub nodes: Arc<dyn NodeSource>,
    pub credentials: Arc<dyn CredentialFetcher>,
    pub cluster: Arc<dyn ClusterClient>,
}

impl Collaborators {
    /// Process-backed collaborators: renderer command, HTTPS probe, kubectl and ssh.
    pub fn from_settings(settings: &BootstrapSettings, spec: &ClusterSpec) -> anyhow::Result<Self> {
        let kubectl = KubectlClient::new(&settings.kubectl, &settings.kubeconfig_path);
        let controller_ip = spec
            .first_controller()
            .map(|c| c.ip)
            .unwrap_or(spec.control_plane_vip);
        Ok(Self {
            renderer: Arc::new(CommandRenderer::new(settings.renderer.clone())),
            probe: Arc::new(HttpProbe::new()?),
            nodes: Arc::new(PreferLocalNodes {
                local: kubectl.clone(),
                remote: SshNodeSource::new(settings.ssh.clone(), controller_ip),
            }),
            credentials: Arc::new(SshCredentialFetcher::new(settings.ssh.clone())),
            cluster: Arc::new(kubectl),
        })
    }
}

pub struct Orchestrator {
    settings: BootstrapSettings,
    spec: ClusterSpec,
    store: StatusStore,
    collab: Collaborators,
    phase: Phase,
    initialized: bool,
}

impl Orchestrator {
    pub fn new(
        settings: BootstrapSettings,
        spec: ClusterSpec,
        store: StatusStore,
        collab: Collaborators,
    ) -> Self {
        Self {
            settings,
            spec,
            store,
            collab,
            phase: Phase::Idle,
            initialized: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the bootstrap to a terminal phase. `shutdown` resolving aborts the
    /// run as [`BootstrapError::Interrupted`]. PXE services are stopped on
    /// every path out of this function.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), BootstrapError> {
        info!("Bootstrapping cluster {}", self.spec.name);
        let mut services: Option<PxeServices> = None;

        let result = tokio::select! {
            r = self.drive(&mut services) => r,
            _ = shutdown => Err(BootstrapError::Interrupted),
        };

        if let Err(e) = &result {
            self.fail(e).await;
        }
        if let Some(pxe) = services.as_mut() {
            pxe.stop().await;
        }
        match &result {
            Ok(()) => info!("Cluster {} bootstrapped", self.spec.name),
            Err(e) => error!("Bootstrap of {} ended in error: {}", self.spec.name, e),
        }
        result
    }

    async fn drive(&mut self, services: &mut Option<PxeServices>) -> Result<(), BootstrapError> {
        // generating
        self.spec
            .validate()
            .map_err(|e| BootstrapError::Validation(format!("{:#}", e)))?;
        let plan = addons::install_order(&self.spec)?;
        self.enter_generating(&plan).await?;
        self.collab
            .renderer
            .render(&self.spec, &self.settings.output_dir)
            .await
            .map_err(|e| BootstrapError::Render(format!("{:#}", e)))?;

        // serving
        self.transition(Phase::Serving, "Starting PXE services").await?;
        let pxe = services.insert(
            PxeServices::start(
                &self.settings.boot_server,
                &self.settings.dhcp_command(),
                &self.settings.services,
            )
            .await?,
        );
        info!("PXE services running (pids {:?})", pxe.pids());

        // waiting, installing_addons
        tokio::select! {
            r = self.wait_and_install(&plan) => r?,
            (service, status) = pxe.any_exited() => {
                return Err(BootstrapError::ServiceExited { service, status });
            }
        }

        self.transition(Phase::Complete, "Cluster bootstrap complete")
            .await
    }

    async fn enter_generating(&mut self, plan: &[&'static AddonSpec]) -> Result<(), BootstrapError> {
        self.check_transition(Phase::Generating)?;
        let names: Vec<&str> = plan.iter().map(|a| a.name).collect();
        self.store.retire_kubeconfig().await?;
        self.store.init(&self.spec, &names).await?;
        self.initialized = true;
        info!(
            "Phase {} -> {} (add-ons: {:?})",
            self.phase,
            Phase::Generating,
            names
        );
        self.phase = Phase::Generating;
        self.store
            .set(StatusPatch::message("Rendering boot artifacts"))
            .await?;
        Ok(())
    }

    async fn wait_and_install(&mut self, plan: &[&'static AddonSpec]) -> Result<(), BootstrapError> {
        self.transition(Phase::Waiting, "Waiting for control plane and nodes")
            .await?;
        let poller = HealthPoller::new(
            self.collab.probe.clone(),
            self.collab.nodes.clone(),
            self.collab.credentials.clone(),
            self.store.clone(),
            self.settings.polling.clone(),
        );
        let report = poller.run(&self.spec).await?;
        info!(
            "{}/{} nodes ready, credential {}",
            report.ready_nodes,
            report.expected_nodes,
            if report.kubeconfig_ready { "retrieved" } else { "missing" }
        );

        self.transition(
            Phase::InstallingAddons,
            format!("Installing {} add-ons", plan.len()),
        )
        .await?;
        let installer = AddonInstaller::new(
            self.collab.cluster.clone(),
            self.store.clone(),
            self.settings.addons.clone(),
            self.settings.manifest_dir.clone(),
        );
        installer.run(&self.spec, plan).await
    }

    fn check_transition(&self, next: Phase) -> Result<(), BootstrapError> {
        if self.phase.can_transition_to(next) {
            Ok(())
        } else {
            Err(BootstrapError::IllegalTransition {
                from: self.phase,
                to: next,
            })
        }
    }

    async fn transition(
        &mut self,
        next: Phase,
        message: impl Into<String>,
    ) -> Result<(), BootstrapError> {
        self.check_transition(next)?;
        let message = message.into();
        info!("Phase {} -> {}: {}", self.phase, next, message);
        self.store.set(StatusPatch::phase(next, message)).await?;
        self.phase = next;
        Ok(())
    }

    /// Best-effort terminal write. Failures here are logged, never raised.
    async fn fail(&mut self, err: &BootstrapError) {
        if !self.phase.can_transition_to(Phase::Error) {
            warn!("Not recording {} over terminal phase {}", err, self.phase);
            return;
        }
        error!("Bootstrap failed in phase {}: {}", self.phase, err);
        let message = err.to_string();

        if !self.initialized {
            if let Err(e) = self
                .store
                .record_early_failure(&self.spec.name, &message)
                .await
            {
                warn!("Failed to record failure: {:#}", e);
            }
            self.phase = Phase::Error;
            return;
        }

        match self.store.load().await {
            Ok(status) => {
                for addon in status
                    .addons
                    .iter()
                    .filter(|a| a.status == AddonState::Deploying)
                {
                    if let Err(e) = self
                        .store
                        .set_addon(&addon.name, AddonState::Error, &message)
                        .await
                    {
                        warn!("Failed to mark {} as failed: {:#}", addon.name, e);
                    }
                }
            }
            Err(e) => warn!("Failed to read status while failing: {:#}", e),
        }
        if let Err(e) = self
            .store
            .set(StatusPatch::phase(Phase::Error, message))
            .await
        {
            warn!("Failed to record error phase: {:#}", e);
        }
        self.phase = Phase::Error;
    }
}
