//! Network-related constants.

/// Port the Kubernetes API server listens on behind the control-plane VIP.
pub const CONTROL_PLANE_PORT: u16 = 6443;

/// Liveness path queried on the control plane.
pub const CONTROL_PLANE_HEALTH_PATH: &str = "/livez";

/// Default port for the status dashboard API.
pub const DEFAULT_DASHBOARD_PORT: u16 = 8090;

/// Default dashboard address used by `metalbootctl`.
pub const DEFAULT_DASHBOARD_ADDR: &str = "http://127.0.0.1:8090";

/// Remote user used to fetch the admin credential from the first controller.
pub const DEFAULT_SSH_USER: &str = "core";

/// Location of the admin kubeconfig on a controller node.
pub const REMOTE_ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
