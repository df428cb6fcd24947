use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use pkg_types::cluster::ClusterSpec;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::exec;

/// Produces boot profiles, DHCP and Ignition files for a cluster.
#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    async fn render(&self, spec: &ClusterSpec, out_dir: &Path) -> Result<()>;
}

/// Delegates rendering to an external command, invoked as
/// `<argv...> --spec <out_dir>/cluster.yaml --out <out_dir>`.
pub struct CommandRenderer {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            timeout: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl ArtifactRenderer for CommandRenderer {
    async fn render(&self, spec: &ClusterSpec, out_dir: &Path) -> Result<()> {
        let Some((program, base_args)) = self.argv.split_first() else {
            bail!("no renderer command configured");
        };
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("failed to create {}", out_dir.display()))?;

        let spec_path = out_dir.join("cluster.yaml");
        tokio::fs::write(&spec_path, serde_yaml::to_string(spec)?)
            .await
            .with_context(|| format!("failed to write {}", spec_path.display()))?;

        let mut args = base_args.to_vec();
        args.extend([
            "--spec".to_string(),
            spec_path.to_string_lossy().to_string(),
            "--out".to_string(),
            out_dir.to_string_lossy().to_string(),
        ]);
        exec::run(program, &args, None, self.timeout).await?;
        info!("Rendered boot artifacts into {}", out_dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClusterSpec {
        ClusterSpec::from_yaml(
            r#"
name: lab
control-plane-vip: 10.0.0.10
kubernetes-version: v1.30.2
pod-cidr: 10.244.0.0/16
service-cidr: 10.96.0.0/12
controllers:
  - { name: cp-1, ip: 10.0.0.11, mac: "52:54:00:00:00:11" }
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn writes_spec_and_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("generated");
        // Copies the spec it was given to prove the arguments line up.
        let renderer = CommandRenderer::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "cp \"$2\" \"$4/rendered.yaml\"".to_string(),
            "render".to_string(),
        ]);
        renderer.render(&spec(), &out).await.unwrap();
        let rendered = std::fs::read_to_string(out.join("rendered.yaml")).unwrap();
        assert!(rendered.contains("name: lab"));
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = CommandRenderer::new(vec!["false".to_string()]);
        assert!(renderer.render(&spec(), dir.path()).await.is_err());
        let empty = CommandRenderer::new(vec![]);
        assert!(empty.render(&spec(), dir.path()).await.is_err());
    }
}
