use pkg_types::status::Phase;
use thiserror::Error;

/// Failures that end a bootstrap run. Each one lands in the status document
/// as the terminal `error` message.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid cluster spec: {0}")]
    Validation(String),

    #[error("failed to render boot artifacts: {0}")]
    Render(String),

    #[error("PXE service {service} failed to start: {reason}")]
    ServiceStart { service: String, reason: String },

    #[error("PXE service {service} exited unexpectedly ({status})")]
    ServiceExited { service: String, status: String },

    #[error("timed out waiting for {stage} after {elapsed_secs}s: {detail}")]
    Timeout {
        stage: &'static str,
        elapsed_secs: u64,
        detail: String,
    },

    #[error("cluster credential missing at {0}; add-ons cannot be installed")]
    MissingCredential(String),

    #[error("add-on {addon} requires {dependency}, which is not enabled")]
    UnmetDependency { addon: String, dependency: String },

    #[error("add-on {addon}: apply failed: {reason}")]
    Apply { addon: String, reason: String },

    #[error("add-on {addon}: rollout of {workload} did not complete: {reason}")]
    RolloutTimeout {
        addon: String,
        workload: String,
        reason: String,
    },

    #[error("add-on {addon}: readiness probe failed: {reason}")]
    ProbeFailure { addon: String, reason: String },

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("interrupted by termination signal")]
    Interrupted,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BootstrapError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Interrupted => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_step() {
        let err = BootstrapError::RolloutTimeout {
            addon: "metallb".to_string(),
            workload: "daemonset/speaker".to_string(),
            reason: "timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "add-on metallb: rollout of daemonset/speaker did not complete: timed out"
        );

        let err = BootstrapError::Timeout {
            stage: "nodes",
            elapsed_secs: 1800,
            detail: "2/3 nodes ready".to_string(),
        };
        assert!(err.to_string().contains("2/3 nodes ready"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(BootstrapError::Interrupted.exit_code(), 130);
        assert_eq!(BootstrapError::Validation("x".into()).exit_code(), 1);
    }
}
