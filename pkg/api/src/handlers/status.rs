use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use pkg_state::StatusStore;
use tracing::{debug, error};

use crate::AppState;

/// GET /api/v1/status: the current status document, or the idle document
/// when no run has written one yet.
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match StatusStore::read(&state.status_path).await {
        Ok(status) => {
            debug!("Serving status (phase {})", status.phase);
            (StatusCode::OK, Json(status)).into_response()
        }
        Err(e) => {
            error!("Failed to read status: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read status: {:#}", e),
            )
                .into_response()
        }
    }
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
