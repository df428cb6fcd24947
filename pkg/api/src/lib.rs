pub mod handlers;
pub mod request_id;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Status document written by the bootstrap process. Read on every request.
    pub status_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(status_path: impl Into<PathBuf>) -> Self {
        Self {
            status_path: Arc::new(status_path.into()),
        }
    }
}
