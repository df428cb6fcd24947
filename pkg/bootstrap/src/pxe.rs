//! Supervision of the PXE boot server and the DHCP-proxy/TFTP daemon.
//!
//! Each service is a child process owned by a supervisor task. The handle
//! exposes `stop()` (SIGTERM, grace period, SIGKILL) and `exited()`, which
//! resolves when the child dies for any reason. Dropping a handle stops
//! the child.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::BootstrapError;
use crate::settings::ServiceSettings;

/// A long-running child process with an observable exit.
pub struct SupervisedService {
    name: String,
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<String>>,
    task: Option<JoinHandle<()>>,
}

impl SupervisedService {
    /// Spawn `argv` and start supervising it.
    pub fn spawn(
        name: &str,
        argv: &[String],
        stop_grace: Duration,
    ) -> Result<Self, BootstrapError> {
        let start_err = |reason: String| BootstrapError::ServiceStart {
            service: name.to_string(),
            reason,
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| start_err("no command configured".to_string()))?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| start_err(format!("{}: {}", program, e)))?;
        let pid = child.id();
        info!("Started {} (pid {:?}): {}", name, pid, argv.join(" "));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on stop() and when the handle is dropped.
                _ = stop_rx => terminate(&task_name, &mut child, stop_grace).await,
            };
            let description = match status {
                Ok(s) => s.to_string(),
                Err(e) => format!("wait failed: {}", e),
            };
            info!("{} exited: {}", task_name, description);
            let _ = exit_tx.send(Some(description));
        });

        Ok(Self {
            name: name.to_string(),
            pid,
            stop_tx: Some(stop_tx),
            exit_rx,
            task: Some(task),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Exit description, if the child is already gone.
    pub fn exit_status(&self) -> Option<String> {
        self.exit_rx.borrow().clone()
    }

    /// Resolves with the exit description once the child is gone.
    pub async fn exited(&self) -> String {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(|status| status.is_some()).await {
            Ok(status) => status.clone().unwrap_or_default(),
            Err(_) => "supervisor ended".to_string(),
        }
    }

    /// Stop the child and wait for it. Calling this again, or on a child
    /// that already exited, is a no-op.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            if !self.has_exited() {
                info!("Stopping {}", self.name);
            }
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("{} supervisor task failed: {}", self.name, e);
        }
    }
}

/// SIGTERM, then SIGKILL if the child outlives `grace`.
async fn terminate(
    name: &str,
    child: &mut Child,
    grace: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("SIGTERM to {} (pid {}) failed: {}", name, pid, e);
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status;
        }
        warn!("{} ignored SIGTERM for {}s, killing", name, grace.as_secs());
    }
    child.kill().await?;
    child.wait().await
}

/// The two PXE services the bootstrap node runs while machines boot.
pub struct PxeServices {
    boot_server: SupervisedService,
    dhcp: SupervisedService,
}

impl PxeServices {
    pub const BOOT_SERVER: &'static str = "boot-server";
    pub const DHCP: &'static str = "dhcp-tftp";

    /// Start both services. If either is gone by the end of the startup
    /// grace period, both are stopped and the start fails.
    pub async fn start(
        boot_server: &[String],
        dhcp: &[String],
        settings: &ServiceSettings,
    ) -> Result<Self, BootstrapError> {
        let boot = SupervisedService::spawn(Self::BOOT_SERVER, boot_server, settings.stop_grace)?;
        let dhcp = match SupervisedService::spawn(Self::DHCP, dhcp, settings.stop_grace) {
            Ok(d) => d,
            Err(e) => {
                let mut boot = boot;
                boot.stop().await;
                return Err(e);
            }
        };
        let mut services = Self {
            boot_server: boot,
            dhcp,
        };

        tokio::time::sleep(settings.startup_grace).await;
        let failed = [&services.boot_server, &services.dhcp]
            .iter()
            .find_map(|s| s.exit_status().map(|status| (s.name().to_string(), status)));
        if let Some((service, status)) = failed {
            services.stop().await;
            return Err(BootstrapError::ServiceStart {
                service,
                reason: format!("exited during startup ({})", status),
            });
        }
        Ok(services)
    }

    /// Resolves when either service exits, with the service name and exit status.
    pub async fn any_exited(&self) -> (String, String) {
        tokio::select! {
            status = self.boot_server.exited() => (self.boot_server.name().to_string(), status),
            status = self.dhcp.exited() => (self.dhcp.name().to_string(), status),
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        [self.boot_server.pid(), self.dhcp.pid()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Stop both services. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.boot_server.stop().await;
        self.dhcp.stop().await;
    }
}
