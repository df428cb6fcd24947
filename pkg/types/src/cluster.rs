use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use crate::status::NodeRole;
use crate::validate;

/// Operator-supplied description of the cluster to bootstrap (YAML).
///
/// Example `cluster.yaml`:
/// ```yaml
/// name: lab
/// control-plane-vip: 10.0.0.10
/// kubernetes-version: v1.30.2
/// pod-cidr: 10.244.0.0/16
/// service-cidr: 10.96.0.0/12
/// controllers:
///   - { name: cp-1, ip: 10.0.0.11, mac: "52:54:00:00:00:11" }
/// workers:
///   - { name: worker-1, ip: 10.0.0.21, mac: "52:54:00:00:00:21" }
/// addons:
///   metallb: { enabled: true, version: v0.14.5, address-range: 10.0.0.200-10.0.0.250 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    #[serde(alias = "control-plane-vip")]
    pub control_plane_vip: IpAddr,
    #[serde(alias = "kubernetes-version")]
    pub kubernetes_version: String,
    #[serde(alias = "pod-cidr")]
    pub pod_cidr: String,
    #[serde(alias = "service-cidr")]
    pub service_cidr: String,
    /// CNI installed by the cluster join tool. Not an add-on.
    #[serde(default = "default_network")]
    pub network: String,
    pub controllers: Vec<NodeSpec>,
    #[serde(default)]
    pub workers: Vec<NodeSpec>,
    #[serde(default)]
    pub addons: BTreeMap<String, AddonConfig>,
}

fn default_network() -> String {
    "flannel".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub ip: IpAddr,
    pub mac: String,
}

/// Per add-on settings. Anything besides `enabled` and `version` is kept
/// as a free-form parameter for the add-on's post-ready configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddonConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl AddonConfig {
    /// Look up a string parameter, accepting both `snake_case` and `kebab-case` keys.
    pub fn param_str(&self, key: &str) -> Option<String> {
        let kebab = key.replace('_', "-");
        self.params
            .get(key)
            .or_else(|| self.params.get(&kebab))
            .and_then(|v| match v {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                serde_yaml::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
    }
}

impl ClusterSpec {
    /// Load and validate a cluster spec from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let spec = Self::parse_file(path)?;
        spec.validate()
            .with_context(|| format!("invalid cluster spec {}", path.display()))?;
        Ok(spec)
    }

    /// Parse a YAML file without validating it.
    pub fn parse_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster spec {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("malformed cluster spec {}", path.display()))
    }

    /// Parse and validate a cluster spec.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let spec: ClusterSpec = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate::validate_cluster_spec(self)
    }

    /// Every node with its role, controllers first.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeSpec, NodeRole)> {
        self.controllers
            .iter()
            .map(|n| (n, NodeRole::Controller))
            .chain(self.workers.iter().map(|n| (n, NodeRole::Worker)))
    }

    pub fn node_count(&self) -> usize {
        self.controllers.len() + self.workers.len()
    }

    pub fn first_controller(&self) -> Option<&NodeSpec> {
        self.controllers.first()
    }

    pub fn addon_enabled(&self, name: &str) -> bool {
        self.addons.get(name).is_some_and(|a| a.enabled)
    }

    pub fn addon(&self, name: &str) -> Option<&AddonConfig> {
        self.addons.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: lab
control-plane-vip: 10.0.0.10
kubernetes-version: v1.30.2
pod-cidr: 10.244.0.0/16
service-cidr: 10.96.0.0/12
controllers:
  - { name: cp-1, ip: 10.0.0.11, mac: "52:54:00:00:00:11" }
workers:
  - { name: worker-1, ip: 10.0.0.21, mac: "52:54:00:00:00:21" }
addons:
  metallb:
    enabled: true
    version: v0.14.5
    address-range: 10.0.0.200-10.0.0.250
  rook-ceph:
    enabled: false
"#;

    #[test]
    fn parses_sample_spec() {
        let spec = ClusterSpec::from_yaml(SAMPLE).unwrap();
        assert_eq!(spec.name, "lab");
        assert_eq!(spec.network, "flannel");
        assert_eq!(spec.node_count(), 2);
        assert!(spec.addon_enabled("metallb"));
        assert!(!spec.addon_enabled("rook-ceph"));
        assert!(!spec.addon_enabled("nebraska"));
        assert_eq!(
            spec.addon("metallb").unwrap().param_str("address_range").as_deref(),
            Some("10.0.0.200-10.0.0.250")
        );
    }

    #[test]
    fn nodes_lists_controllers_first() {
        let spec = ClusterSpec::from_yaml(SAMPLE).unwrap();
        let roles: Vec<_> = spec.nodes().map(|(n, r)| (n.name.clone(), r)).collect();
        assert_eq!(
            roles,
            vec![
                ("cp-1".to_string(), NodeRole::Controller),
                ("worker-1".to_string(), NodeRole::Worker)
            ]
        );
    }

    #[test]
    fn parse_file_skips_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        // Duplicate node name: parses, but does not validate.
        std::fs::write(&path, SAMPLE.replace("worker-1", "cp-1")).unwrap();
        let spec = ClusterSpec::parse_file(&path).unwrap();
        assert_eq!(spec.node_count(), 2);
        assert!(ClusterSpec::load(&path).is_err());
    }

    #[test]
    fn rejects_bad_ip() {
        let bad = SAMPLE.replace("10.0.0.21", "10.0.0.999");
        assert!(ClusterSpec::from_yaml(&bad).is_err());
    }
}
