//! The `waiting` phase: control-plane health, credential retrieval and node
//! readiness, all under one deadline that starts when the phase begins.

use pkg_constants::timeouts;
use pkg_state::{StatusPatch, StatusStore};
use pkg_types::cluster::ClusterSpec;
use pkg_types::status::NodeState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::{NodeSource, ObservedNode};
use crate::credentials::CredentialFetcher;
use crate::error::BootstrapError;
use crate::probe::{ControlPlaneProbe, control_plane_endpoint};
use crate::settings::PollSettings;

/// A fixed time budget measured from `start()`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.limit
    }

    /// Sleep for `interval`, never past the deadline and never for less
    /// than the polling floor.
    pub async fn pause(&self, interval: Duration) {
        let floor = Duration::from_millis(timeouts::MIN_POLL_INTERVAL_MS);
        tokio::time::sleep(interval.max(floor).min(self.remaining())).await;
    }
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub ready_nodes: usize,
    pub expected_nodes: usize,
    pub kubeconfig_ready: bool,
}

pub struct HealthPoller {
    probe: Arc<dyn ControlPlaneProbe>,
    nodes: Arc<dyn NodeSource>,
    credentials: Arc<dyn CredentialFetcher>,
    store: StatusStore,
    settings: PollSettings,
}

impl HealthPoller {
    pub fn new(
        probe: Arc<dyn ControlPlaneProbe>,
        nodes: Arc<dyn NodeSource>,
        credentials: Arc<dyn CredentialFetcher>,
        store: StatusStore,
        settings: PollSettings,
    ) -> Self {
        Self {
            probe,
            nodes,
            credentials,
            store,
            settings,
        }
    }

    /// Wait for the control plane, fetch the credential, then wait for every
    /// node in `spec` to report ready.
    pub async fn run(&self, spec: &ClusterSpec) -> Result<HealthReport, BootstrapError> {
        let deadline = Deadline::start(self.settings.overall_timeout);
        for (node, _) in spec.nodes() {
            self.store
                .set_node(&node.name, NodeState::PxeBooting, "Waiting for PXE boot")
                .await?;
        }

        let endpoint = control_plane_endpoint(spec.control_plane_vip);
        self.store
            .set(StatusPatch::message(format!(
                "Waiting for control plane at {}",
                endpoint
            )))
            .await?;
        self.wait_for_control_plane(&endpoint, &deadline).await?;

        let kubeconfig_ready = self.retrieve_credential(spec, &deadline).await?;

        let expected = spec.node_count();
        let ready_nodes = self.wait_for_nodes_ready(spec, expected, &deadline).await?;
        Ok(HealthReport {
            ready_nodes,
            expected_nodes: expected,
            kubeconfig_ready,
        })
    }

    /// Poll `endpoint` until it reports healthy.
    pub async fn wait_for_control_plane(
        &self,
        endpoint: &str,
        deadline: &Deadline,
    ) -> Result<(), BootstrapError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.probe.check(endpoint).await {
                Ok(true) => {
                    info!(
                        "Control plane healthy after {}s ({} attempts)",
                        deadline.elapsed().as_secs(),
                        attempt
                    );
                    return Ok(());
                }
                Ok(false) => info!(
                    "Control plane not healthy yet (attempt {}, {}s elapsed)",
                    attempt,
                    deadline.elapsed().as_secs()
                ),
                Err(e) => info!(
                    "Control plane unreachable (attempt {}, {}s elapsed): {:#}",
                    attempt,
                    deadline.elapsed().as_secs(),
                    e
                ),
            }
            if deadline.expired() {
                return Err(BootstrapError::Timeout {
                    stage: "control plane",
                    elapsed_secs: deadline.elapsed().as_secs(),
                    detail: format!("{} never reported ok", endpoint),
                });
            }
            self.pause(deadline).await;
        }
    }

    /// Copy the admin credential from the first controller. Failure is not
    /// fatal here; it only leaves `kubeconfig_ready` false.
    pub async fn retrieve_credential(
        &self,
        spec: &ClusterSpec,
        deadline: &Deadline,
    ) -> Result<bool, BootstrapError> {
        let Some(controller) = spec.first_controller() else {
            return Ok(false);
        };
        let dest = self.store.kubeconfig_path().to_path_buf();
        let attempts = self.settings.credential_attempts.max(1);

        for attempt in 1..=attempts {
            match self.credentials.fetch(controller, &dest).await {
                Ok(()) => {
                    let ready = self.store.refresh_kubeconfig().await?;
                    info!("Cluster credential retrieved from {}", controller.name);
                    return Ok(ready);
                }
                Err(e) => warn!(
                    "Credential retrieval from {} failed (attempt {}/{}): {:#}",
                    controller.name, attempt, attempts, e
                ),
            }
            if attempt == attempts || deadline.expired() {
                break;
            }
            self.pause(deadline).await;
        }

        warn!(
            "Giving up on the cluster credential from {}; add-ons will not be installable",
            controller.name
        );
        self.store
            .set(StatusPatch::message(format!(
                "Could not retrieve cluster credential from {}",
                controller.name
            )))
            .await?;
        Ok(self.store.refresh_kubeconfig().await?)
    }

    /// Poll the node list until at least `expected` nodes are ready.
    /// Node entries in the status document follow what is observed.
    pub async fn wait_for_nodes_ready(
        &self,
        spec: &ClusterSpec,
        expected: usize,
        deadline: &Deadline,
    ) -> Result<usize, BootstrapError> {
        if expected == 0 {
            info!("No nodes expected, skipping readiness wait");
            return Ok(0);
        }

        let mut shown: HashMap<String, NodeState> = spec
            .nodes()
            .map(|(n, _)| (n.name.clone(), NodeState::PxeBooting))
            .collect();
        let mut ready = 0usize;
        let mut reported: Option<usize> = None;

        loop {
            match self.nodes.list_nodes().await {
                Ok(observed) => {
                    ready = observed.iter().filter(|n| n.ready).count();
                    self.sync_nodes(spec, &observed, &mut shown).await?;
                }
                Err(e) => debug!("Node query failed: {:#}", e),
            }
            info!(
                "{}/{} nodes ready ({}s elapsed)",
                ready,
                expected,
                deadline.elapsed().as_secs()
            );
            if reported != Some(ready) {
                self.store
                    .set(StatusPatch::message(format!(
                        "Waiting for nodes: {}/{} ready",
                        ready, expected
                    )))
                    .await?;
                reported = Some(ready);
            }
            if ready >= expected {
                return Ok(ready);
            }
            if deadline.expired() {
                return Err(BootstrapError::Timeout {
                    stage: "nodes",
                    elapsed_secs: deadline.elapsed().as_secs(),
                    detail: format!("{}/{} nodes ready", ready, expected),
                });
            }
            self.pause(deadline).await;
        }
    }

    /// Write node states that changed since the last poll.
    async fn sync_nodes(
        &self,
        spec: &ClusterSpec,
        observed: &[ObservedNode],
        shown: &mut HashMap<String, NodeState>,
    ) -> anyhow::Result<()> {
        for (node, _) in spec.nodes() {
            let ip = node.ip.to_string();
            let Some(seen) = observed
                .iter()
                .find(|o| o.name == node.name || o.addresses.contains(&ip))
            else {
                continue;
            };
            let (state, message) = if seen.ready {
                (NodeState::Ready, "Node is Ready")
            } else {
                (NodeState::Installing, "Registered, waiting for Ready")
            };
            if shown.get(&node.name) != Some(&state) {
                self.store.set_node(&node.name, state, message).await?;
                shown.insert(node.name.clone(), state);
            }
        }
        Ok(())
    }

    async fn pause(&self, deadline: &Deadline) {
        deadline.pause(self.settings.poll_interval).await;
    }
}
