use anyhow::Result;
use async_trait::async_trait;
use pkg_constants::network::{CONTROL_PLANE_HEALTH_PATH, CONTROL_PLANE_PORT};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Liveness check against the control plane.
#[async_trait]
pub trait ControlPlaneProbe: Send + Sync {
    /// `Ok(true)` only when the endpoint answers "ok".
    async fn check(&self, endpoint: &str) -> Result<bool>;
}

/// Health URL of the control plane behind `vip`.
pub fn control_plane_endpoint(vip: IpAddr) -> String {
    format!(
        "https://{}{}",
        SocketAddr::new(vip, CONTROL_PLANE_PORT),
        CONTROL_PLANE_HEALTH_PATH
    )
}

/// HTTPS probe. The cluster CA is not known yet, so certificates are not verified.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ControlPlaneProbe for HttpProbe {
    async fn check(&self, endpoint: &str) -> Result<bool> {
        let resp = self.client.get(endpoint).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        debug!("{} -> {} {:?}", endpoint, status, body.trim());
        Ok(status.is_success() && body.trim() == "ok")
    }
}
