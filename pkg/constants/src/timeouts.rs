//! Polling intervals and deadlines, in seconds unless stated otherwise.

/// Overall deadline for the `waiting` phase (control plane + nodes).
pub const OVERALL_DEADLINE_SECS: u64 = 1800;

/// Interval between health polls.
pub const POLL_INTERVAL_SECS: u64 = 15;

/// Floor for every poll sleep, in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Number of attempts made to retrieve the admin credential.
pub const CREDENTIAL_ATTEMPTS: u32 = 10;

/// Per-workload rollout wait.
pub const ROLLOUT_TIMEOUT_SECS: u64 = 300;

/// Bound on the Ceph health probe.
pub const CEPH_HEALTH_TIMEOUT_SECS: u64 = 900;

/// Interval between Ceph health probes.
pub const CEPH_HEALTH_INTERVAL_SECS: u64 = 20;

/// Timeout for a single `kubectl apply`.
pub const APPLY_TIMEOUT_SECS: u64 = 120;

/// A PXE service that dies within this window failed to start.
pub const SERVICE_STARTUP_GRACE_SECS: u64 = 2;

/// Time a PXE service gets between SIGTERM and SIGKILL.
pub const SERVICE_STOP_GRACE_SECS: u64 = 10;
