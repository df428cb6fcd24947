use axum::{Router, middleware, routing::get};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::handlers::status;
use crate::request_id::request_id_middleware;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub status_path: PathBuf,
}

/// Read-only dashboard routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status::get_status))
        .route("/healthz", get(status::healthz))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve the dashboard API until `shutdown` resolves.
pub async fn start_server(
    config: ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(AppState::new(&config.status_path));

    info!(
        "Starting dashboard API on {} (status file {})",
        config.addr,
        config.status_path.display()
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Dashboard API stopped");
    Ok(())
}
