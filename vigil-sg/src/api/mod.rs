//! HTTP control surface for Vigil
//!
//! The transport is a thin boundary adapter: stream lifecycle, chunk
//! ingest, overrides and adjustment responses arrive over REST; pipeline
//! outcomes leave over SSE.

pub mod handlers;
pub mod sse;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use vigil_common::events::EventBus;

use crate::db::ProfileStore;
use crate::engine::{LearningEngine, SessionCoordinator};
use crate::Error;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub store: Arc<dyn ProfileStore>,
    pub learning: Arc<LearningEngine>,
    pub events: EventBus,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(health_check))
        // API v1 routes
        .nest(
            "/api/v1",
            Router::new()
                // Stream lifecycle
                .route("/streams", post(handlers::start_stream))
                .route("/streams", get(handlers::list_streams))
                .route("/streams/:stream_id", delete(handlers::stop_stream))
                // Ingestion
                .route("/streams/:stream_id/chunks", post(handlers::ingest_chunk))
                // Viewers
                .route("/streams/:stream_id/viewers", post(handlers::add_viewer))
                .route(
                    "/streams/:stream_id/viewers/:viewer_id",
                    delete(handlers::remove_viewer),
                )
                // Overrides and retrospection
                .route("/streams/:stream_id/override", post(handlers::submit_override))
                .route("/streams/:stream_id/safety", get(handlers::safety_search))
                .route("/streams/:stream_id/stats", get(handlers::session_stats))
                // Per-user learning
                .route(
                    "/users/:user_id/adjustment",
                    post(handlers::adjustment_response),
                )
                .route("/users/:user_id/learning", get(handlers::learning_status))
                .route("/users/:user_id/learning", delete(handlers::reset_learning))
                // Profiles and whitelist
                .route("/users/:user_id/profile", get(handlers::get_profile))
                .route("/users/:user_id/profile", put(handlers::put_profile))
                .route("/users/:user_id/whitelist", get(handlers::list_whitelist))
                .route("/users/:user_id/whitelist", post(handlers::add_whitelist))
                .route(
                    "/users/:user_id/whitelist/:entry_id",
                    delete(handlers::remove_whitelist),
                )
                // Detection log
                .route("/users/:user_id/detections", get(handlers::detection_log))
                // SSE events
                .route("/events", get(sse::event_stream)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "vigil-sg",
        "version": env!("CARGO_PKG_VERSION"),
        "active_streams": state.coordinator.active_streams().await.len(),
    }))
}

/// Map a pipeline error onto an HTTP response
///
/// Nothing internal is fatal; errors surface as structured JSON bodies.
pub(crate) fn error_response(error: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() })))
}
