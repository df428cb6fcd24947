use pkg_constants::{network, paths, timeouts};
use pkg_types::config::BootstrapConfigFile;
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::SshTarget;

/// Fully resolved settings for one run, passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub status_path: PathBuf,
    pub kubeconfig_path: PathBuf,
    pub output_dir: PathBuf,
    pub manifest_dir: PathBuf,
    pub kubectl: String,
    pub ssh: SshTarget,
    pub renderer: Vec<String>,
    pub boot_server: Vec<String>,
    /// `None` runs dnsmasq on the config rendered into `output_dir`.
    pub dhcp_server: Option<Vec<String>>,
    pub polling: PollSettings,
    pub addons: AddonSettings,
    pub services: ServiceSettings,
}

/// Deadlines for the `waiting` phase.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Shared by the control-plane and node-readiness waits.
    pub overall_timeout: Duration,
    pub poll_interval: Duration,
    pub credential_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct AddonSettings {
    pub apply_timeout: Duration,
    pub rollout_timeout: Duration,
    pub ceph_health_timeout: Duration,
    pub ceph_health_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub startup_grace: Duration,
    pub stop_grace: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(timeouts::OVERALL_DEADLINE_SECS),
            poll_interval: Duration::from_secs(timeouts::POLL_INTERVAL_SECS),
            credential_attempts: timeouts::CREDENTIAL_ATTEMPTS,
        }
    }
}

impl Default for AddonSettings {
    fn default() -> Self {
        Self {
            apply_timeout: Duration::from_secs(timeouts::APPLY_TIMEOUT_SECS),
            rollout_timeout: Duration::from_secs(timeouts::ROLLOUT_TIMEOUT_SECS),
            ceph_health_timeout: Duration::from_secs(timeouts::CEPH_HEALTH_TIMEOUT_SECS),
            ceph_health_interval: Duration::from_secs(timeouts::CEPH_HEALTH_INTERVAL_SECS),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(timeouts::SERVICE_STARTUP_GRACE_SECS),
            stop_grace: Duration::from_secs(timeouts::SERVICE_STOP_GRACE_SECS),
        }
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            status_path: PathBuf::from(paths::DEFAULT_STATUS_PATH),
            kubeconfig_path: PathBuf::from(paths::DEFAULT_KUBECONFIG_PATH),
            output_dir: PathBuf::from(paths::DEFAULT_OUTPUT_DIR),
            manifest_dir: PathBuf::from(paths::DEFAULT_MANIFEST_DIR),
            kubectl: paths::DEFAULT_KUBECTL.to_string(),
            ssh: SshTarget {
                program: paths::DEFAULT_SSH.to_string(),
                user: network::DEFAULT_SSH_USER.to_string(),
                identity: None,
            },
            renderer: vec![paths::DEFAULT_RENDERER.to_string()],
            boot_server: vec![paths::DEFAULT_BOOT_SERVER.to_string()],
            dhcp_server: None,
            polling: PollSettings::default(),
            addons: AddonSettings::default(),
            services: ServiceSettings::default(),
        }
    }
}

impl BootstrapSettings {
    /// Command line of the DHCP/TFTP daemon.
    pub fn dhcp_command(&self) -> Vec<String> {
        match &self.dhcp_server {
            Some(cmd) => cmd.clone(),
            None => vec![
                paths::DEFAULT_DHCP_SERVER.to_string(),
                "--keep-in-foreground".to_string(),
                format!(
                    "--conf-file={}",
                    self.output_dir.join("dnsmasq.conf").display()
                ),
            ],
        }
    }

    /// Overlay the values present in a config file onto the defaults.
    pub fn from_file(file: &BootstrapConfigFile) -> Self {
        let mut s = Self::default();
        if let Some(v) = &file.status_path {
            s.status_path = PathBuf::from(v);
        }
        if let Some(v) = &file.kubeconfig_path {
            s.kubeconfig_path = PathBuf::from(v);
        }
        if let Some(v) = &file.output_dir {
            s.output_dir = PathBuf::from(v);
        }
        if let Some(v) = &file.manifest_dir {
            s.manifest_dir = PathBuf::from(v);
        }
        if let Some(v) = &file.kubectl {
            s.kubectl = v.clone();
        }
        if let Some(v) = &file.ssh_user {
            s.ssh.user = v.clone();
        }
        if let Some(v) = &file.ssh_identity {
            s.ssh.identity = Some(PathBuf::from(v));
        }
        if let Some(v) = file.renderer.as_ref().filter(|v| !v.is_empty()) {
            s.renderer = v.clone();
        }
        if let Some(v) = file.boot_server.as_ref().filter(|v| !v.is_empty()) {
            s.boot_server = v.clone();
        }
        if let Some(v) = file.dhcp_server.as_ref().filter(|v| !v.is_empty()) {
            s.dhcp_server = Some(v.clone());
        }
        if let Some(v) = file.overall_timeout_secs {
            s.polling.overall_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.poll_interval_secs {
            s.polling.poll_interval = Duration::from_secs(v.max(1));
        }
        if let Some(v) = file.credential_attempts {
            s.polling.credential_attempts = v;
        }
        if let Some(v) = file.rollout_timeout_secs {
            s.addons.rollout_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.ceph_health_timeout_secs {
            s.addons.ceph_health_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.ceph_health_interval_secs {
            s.addons.ceph_health_interval = Duration::from_secs(v.max(1));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let s = BootstrapSettings::default();
        assert_eq!(s.polling.overall_timeout, Duration::from_secs(1800));
        assert_eq!(s.polling.poll_interval, Duration::from_secs(15));
        assert_eq!(s.polling.credential_attempts, 10);
        assert_eq!(s.addons.rollout_timeout, Duration::from_secs(300));
        assert_eq!(s.addons.ceph_health_timeout, Duration::from_secs(900));
        assert_eq!(s.addons.ceph_health_interval, Duration::from_secs(20));
    }

    #[test]
    fn file_values_override_defaults() {
        let file = BootstrapConfigFile {
            status_path: Some("/tmp/status.json".to_string()),
            poll_interval_secs: Some(5),
            boot_server: Some(vec![]),
            ssh_identity: Some("/root/.ssh/id_ed25519".to_string()),
            ..Default::default()
        };
        let s = BootstrapSettings::from_file(&file);
        assert_eq!(s.status_path, PathBuf::from("/tmp/status.json"));
        assert_eq!(s.polling.poll_interval, Duration::from_secs(5));
        assert_eq!(s.polling.overall_timeout, Duration::from_secs(1800));
        // An empty command list keeps the default.
        assert_eq!(s.boot_server, vec!["matchbox".to_string()]);
        assert_eq!(
            s.ssh.identity.as_deref(),
            Some(std::path::Path::new("/root/.ssh/id_ed25519"))
        );
    }

    #[test]
    fn default_dhcp_config_follows_output_dir() {
        let file = BootstrapConfigFile {
            output_dir: Some("/srv/boot".to_string()),
            ..Default::default()
        };
        let mut s = BootstrapSettings::from_file(&file);
        assert_eq!(
            s.dhcp_command().last().map(String::as_str),
            Some("--conf-file=/srv/boot/dnsmasq.conf")
        );

        // A later override, as from the command line, is picked up too.
        s.output_dir = PathBuf::from("/tmp/artifacts");
        assert_eq!(
            s.dhcp_command().last().map(String::as_str),
            Some("--conf-file=/tmp/artifacts/dnsmasq.conf")
        );

        let default = BootstrapSettings::default().dhcp_command();
        assert_eq!(default[0], "dnsmasq");
        assert_eq!(
            default[2],
            "--conf-file=/var/lib/metalboot/generated/dnsmasq.conf"
        );
    }

    #[test]
    fn zero_intervals_are_raised_to_one_second() {
        let file = BootstrapConfigFile {
            poll_interval_secs: Some(0),
            ceph_health_interval_secs: Some(0),
            ..Default::default()
        };
        let s = BootstrapSettings::from_file(&file);
        assert_eq!(s.polling.poll_interval, Duration::from_secs(1));
        assert_eq!(s.addons.ceph_health_interval, Duration::from_secs(1));
    }

    #[test]
    fn explicit_dhcp_command_is_kept() {
        let file = BootstrapConfigFile {
            output_dir: Some("/srv/boot".to_string()),
            dhcp_server: Some(vec![
                "dnsmasq".to_string(),
                "-C".to_string(),
                "/etc/pxe.conf".to_string(),
            ]),
            ..Default::default()
        };
        let s = BootstrapSettings::from_file(&file);
        assert_eq!(s.dhcp_command(), ["dnsmasq", "-C", "/etc/pxe.conf"]);
    }
}
