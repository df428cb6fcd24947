//! Filesystem path constants.

// ─── Bootstrap node ────────────────────────────────────────────────────────

/// Default config file path for the bootstrap process.
pub const DEFAULT_CONFIG: &str = "/etc/metalboot/config.yaml";

/// Default cluster spec path.
pub const DEFAULT_CLUSTER_SPEC: &str = "/etc/metalboot/cluster.yaml";

/// Default location of the status document shared with the dashboard.
pub const DEFAULT_STATUS_PATH: &str = "/var/lib/metalboot/status.json";

/// Default location the admin kubeconfig is written to once retrieved.
pub const DEFAULT_KUBECONFIG_PATH: &str = "/var/lib/metalboot/auth/kubeconfig";

/// Default directory for rendered boot profiles, DHCP and Ignition files.
pub const DEFAULT_OUTPUT_DIR: &str = "/var/lib/metalboot/generated";

/// Default directory holding locally maintained add-on manifests.
pub const DEFAULT_MANIFEST_DIR: &str = "/usr/share/metalboot/manifests";

// ─── External tools ────────────────────────────────────────────────────────

/// Default kubectl binary.
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// Default ssh binary.
pub const DEFAULT_SSH: &str = "ssh";

/// Default renderer command.
pub const DEFAULT_RENDERER: &str = "metalboot-render";

/// Default boot-profile HTTP server command.
pub const DEFAULT_BOOT_SERVER: &str = "matchbox";

/// Default DHCP-proxy/TFTP daemon command.
pub const DEFAULT_DHCP_SERVER: &str = "dnsmasq";
