use serde::{Deserialize, Serialize};

/// Bootstrap process configuration file (YAML). Every field is optional;
/// CLI flags override file values, which override compiled defaults.
///
/// Example `config.yaml`:
/// ```yaml
/// cluster-spec: /etc/metalboot/cluster.yaml
/// status-path: /var/lib/metalboot/status.json
/// kubeconfig-path: /var/lib/metalboot/auth/kubeconfig
/// ssh-identity: /root/.ssh/id_ed25519
/// boot-server: ["matchbox", "-address=0.0.0.0:8080"]
/// dhcp-server: ["dnsmasq", "--keep-in-foreground", "--conf-file=/var/lib/metalboot/generated/dnsmasq.conf"]
/// overall-timeout-secs: 1800
/// poll-interval-secs: 15
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfigFile {
    #[serde(default, alias = "cluster-spec")]
    pub cluster_spec: Option<String>,
    #[serde(default, alias = "status-path")]
    pub status_path: Option<String>,
    #[serde(default, alias = "kubeconfig-path")]
    pub kubeconfig_path: Option<String>,
    #[serde(default, alias = "output-dir")]
    pub output_dir: Option<String>,
    #[serde(default, alias = "manifest-dir")]
    pub manifest_dir: Option<String>,
    #[serde(default)]
    pub kubectl: Option<String>,
    #[serde(default, alias = "ssh-user")]
    pub ssh_user: Option<String>,
    #[serde(default, alias = "ssh-identity")]
    pub ssh_identity: Option<String>,
    /// Renderer command line; `--spec <file> --out <dir>` is appended.
    #[serde(default)]
    pub renderer: Option<Vec<String>>,
    #[serde(default, alias = "boot-server")]
    pub boot_server: Option<Vec<String>>,
    #[serde(default, alias = "dhcp-server")]
    pub dhcp_server: Option<Vec<String>>,
    #[serde(default, alias = "overall-timeout-secs")]
    pub overall_timeout_secs: Option<u64>,
    #[serde(default, alias = "poll-interval-secs")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, alias = "credential-attempts")]
    pub credential_attempts: Option<u32>,
    #[serde(default, alias = "rollout-timeout-secs")]
    pub rollout_timeout_secs: Option<u64>,
    #[serde(default, alias = "ceph-health-timeout-secs")]
    pub ceph_health_timeout_secs: Option<u64>,
    #[serde(default, alias = "ceph-health-interval-secs")]
    pub ceph_health_interval_secs: Option<u64>,
    /// Port the dashboard API listens on.
    #[serde(default, alias = "dashboard-port")]
    pub dashboard_port: Option<u16>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
