//! HTTP handlers

pub mod cron;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::services::chunk_scheduler::ChunkScheduler;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ChunkScheduler>,
    pub cron_secret: Option<String>,
}

/// Build the router for the cron endpoint and the health probe
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(cron::healthz))
        .route(
            "/api/cron/process-uploads",
            get(cron::process_uploads).post(cron::process_uploads),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
