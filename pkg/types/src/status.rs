use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterSpec;

// --- Phase ---

/// Bootstrap phase. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Generating,
    Serving,
    Waiting,
    InstallingAddons,
    Complete,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }

    /// Whether `self → next` is a legal transition of the bootstrap state machine.
    /// Any non-terminal phase may fail into `Error`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Complete | Error, _) => false,
            (_, Error) => true,
            (Idle, Generating)
            | (Generating, Serving)
            | (Serving, Waiting)
            | (Waiting, InstallingAddons)
            | (InstallingAddons, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Generating => "generating",
            Phase::Serving => "serving",
            Phase::Waiting => "waiting",
            Phase::InstallingAddons => "installing_addons",
            Phase::Complete => "complete",
            Phase::Error => "error",
        };
        f.write_str(s)
    }
}

// --- Nodes ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Controller,
    Worker,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Controller => write!(f, "controller"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// Provisioning progress of one node. Intermediate states are best-effort hints.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    #[default]
    Pending,
    PxeBooting,
    Installing,
    Ready,
    Error,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Pending => write!(f, "pending"),
            NodeState::PxeBooting => write!(f, "pxe-booting"),
            NodeState::Installing => write!(f, "installing"),
            NodeState::Ready => write!(f, "ready"),
            NodeState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub name: String,
    pub ip: String,
    pub role: NodeRole,
    pub status: NodeState,
    #[serde(default)]
    pub message: String,
}

// --- Add-ons ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddonState {
    #[default]
    Pending,
    Deploying,
    Ready,
    Error,
}

impl std::fmt::Display for AddonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonState::Pending => write!(f, "pending"),
            AddonState::Deploying => write!(f, "deploying"),
            AddonState::Ready => write!(f, "ready"),
            AddonState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddonStatus {
    pub name: String,
    pub status: AddonState,
    #[serde(default)]
    pub message: String,
}

// --- Status document ---

/// The status document shared between the bootstrap process and dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BootstrapStatus {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub cluster_name: String,
    pub phase: Phase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Vec<NodeStatus>,
    #[serde(default)]
    pub addons: Vec<AddonStatus>,
    #[serde(default)]
    pub kubeconfig_ready: bool,
}

impl BootstrapStatus {
    /// The document served when no run has written a status yet.
    pub fn idle() -> Self {
        Self {
            message: "No bootstrap has been started".to_string(),
            ..Default::default()
        }
    }

    /// A fresh record for a run: every node pending, `addons` in install order.
    pub fn for_run(run_id: String, spec: &ClusterSpec, addons: &[&str], now: DateTime<Utc>) -> Self {
        let nodes = spec
            .nodes()
            .map(|(node, role)| NodeStatus {
                name: node.name.clone(),
                ip: node.ip.to_string(),
                role,
                status: NodeState::Pending,
                message: String::new(),
            })
            .collect();
        let addons = addons
            .iter()
            .map(|name| AddonStatus {
                name: name.to_string(),
                status: AddonState::Pending,
                message: String::new(),
            })
            .collect();
        Self {
            run_id,
            cluster_name: spec.name.clone(),
            phase: Phase::Generating,
            message: "Validating cluster spec and rendering configs".to_string(),
            started_at: Some(now),
            updated_at: Some(now),
            completed_at: None,
            nodes,
            addons,
            kubeconfig_ready: false,
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn addon(&self, name: &str) -> Option<&AddonStatus> {
        self.addons.iter().find(|a| a.name == name)
    }

    pub fn ready_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeState::Ready)
            .count()
    }
}
