//! Cron-triggered upload processing

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::auth::check_cron_auth;
use crate::types::ErrorResponse;

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Run one scheduler invocation.
///
/// Job-level failures still answer 200 with `success: false`; only a failure
/// before any job was looked at turns into a 500.
pub async fn process_uploads(State(state): State<AppState>, headers: HeaderMap) -> Response {
    check_cron_auth(&headers, state.cron_secret.as_deref());

    match state.scheduler.run_once().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            error!("Cron upload processing failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}
