//! HTTP request handlers
//!
//! Implements the REST endpoints of the control surface. Handlers stay
//! thin: parse, call the coordinator or the engines, map the result.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use vigil_common::types::{
    AdjustmentNotification, FilterCategory, FilterConfig, ProfilePreset, UserProfile,
    WhitelistEntry,
};

use crate::api::{error_response, AppState};
use crate::db::LoggedDetection;
use crate::engine::learning::LearningStatus;
use crate::engine::session::{IngestSummary, SafetyEvent, SafetyQuery, SessionStats};
use crate::engine::{AdjustmentOutcome, MediaChunk, OverrideEvent};
use crate::Error;

type ApiError = (StatusCode, Json<serde_json::Value>);

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartStreamResponse {
    stream_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StreamListResponse {
    streams: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StopStreamResponse {
    cancelled_pending: usize,
}

#[derive(Debug, Deserialize)]
pub struct ViewerRequest {
    viewer_id: String,
}

#[derive(Debug, Serialize)]
pub struct ViewerResponse {
    viewer_count: usize,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    /// Proposed threshold adjustment, when the override pattern produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    adjustment: Option<AdjustmentNotification>,
}

#[derive(Debug, Deserialize)]
pub struct SafetySearchParams {
    start_ms: Option<u64>,
    end_ms: Option<u64>,
    /// Comma-separated category names
    categories: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SafetySearchResponse {
    events: Vec<SafetyEvent>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentResponseRequest {
    category: FilterCategory,
    #[serde(default)]
    subcategory: Option<String>,
    accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct AdjustmentResponseBody {
    outcome: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LearningStatusResponse {
    status: Vec<LearningStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ResetLearningParams {
    category: Option<FilterCategory>,
    subcategory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PutProfileRequest {
    #[serde(default)]
    profile_name: Option<String>,
    /// Either an explicit filter set or a named preset
    #[serde(default)]
    filters: Option<Vec<FilterConfig>>,
    #[serde(default)]
    preset: Option<ProfilePreset>,
}

#[derive(Debug, Deserialize)]
pub struct AddWhitelistRequest {
    label: String,
    value_hash: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
pub struct WhitelistResponse {
    entries: Vec<WhitelistEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DetectionLogParams {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DetectionLogResponse {
    detections: Vec<LoggedDetection>,
}

// ============================================================================
// Stream lifecycle
// ============================================================================

pub async fn start_stream(
    State(state): State<AppState>,
    Json(request): Json<StartStreamRequest>,
) -> Result<Json<StartStreamResponse>, ApiError> {
    if request.user_id.is_empty() {
        return Err(error_response(Error::InvalidInput(
            "user_id must not be empty".to_string(),
        )));
    }
    let session = state.coordinator.start_stream(&request.user_id).await;
    Ok(Json(StartStreamResponse {
        stream_id: session.stream_id(),
    }))
}

pub async fn list_streams(State(state): State<AppState>) -> Json<StreamListResponse> {
    Json(StreamListResponse {
        streams: state.coordinator.active_streams().await,
    })
}

pub async fn stop_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Result<Json<StopStreamResponse>, ApiError> {
    let cancelled_pending = state
        .coordinator
        .stop_stream(stream_id)
        .await
        .map_err(error_response)?;
    Ok(Json(StopStreamResponse { cancelled_pending }))
}

// ============================================================================
// Ingestion
// ============================================================================

pub async fn ingest_chunk(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Json(chunk): Json<MediaChunk>,
) -> Result<Json<IngestSummary>, ApiError> {
    state
        .coordinator
        .ingest_chunk(stream_id, chunk)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Viewers
// ============================================================================

pub async fn add_viewer(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Json(request): Json<ViewerRequest>,
) -> Result<Json<ViewerResponse>, ApiError> {
    state
        .coordinator
        .add_viewer(stream_id, &request.viewer_id)
        .await
        .map(|viewer_count| Json(ViewerResponse { viewer_count }))
        .map_err(error_response)
}

pub async fn remove_viewer(
    State(state): State<AppState>,
    Path((stream_id, viewer_id)): Path<(Uuid, String)>,
) -> Result<Json<ViewerResponse>, ApiError> {
    state
        .coordinator
        .remove_viewer(stream_id, &viewer_id)
        .await
        .map(|viewer_count| Json(ViewerResponse { viewer_count }))
        .map_err(error_response)
}

// ============================================================================
// Overrides and retrospection
// ============================================================================

pub async fn submit_override(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Json(event): Json<OverrideEvent>,
) -> Result<Json<OverrideResponse>, ApiError> {
    state
        .coordinator
        .handle_override(stream_id, event)
        .await
        .map(|adjustment| Json(OverrideResponse { adjustment }))
        .map_err(error_response)
}

pub async fn safety_search(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Query(params): Query<SafetySearchParams>,
) -> Result<Json<SafetySearchResponse>, ApiError> {
    let categories = match &params.categories {
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse::<FilterCategory>())
            .collect::<vigil_common::Result<Vec<_>>>()
            .map_err(|e| error_response(e.into()))?,
        None => Vec::new(),
    };

    let query = SafetyQuery {
        start_ms: params.start_ms,
        end_ms: params.end_ms,
        categories,
    };
    state
        .coordinator
        .safety_search(stream_id, &query)
        .await
        .map(|events| Json(SafetySearchResponse { events }))
        .map_err(error_response)
}

pub async fn session_stats(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Result<Json<SessionStats>, ApiError> {
    state
        .coordinator
        .session_stats(stream_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Per-user learning
// ============================================================================

pub async fn adjustment_response(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<AdjustmentResponseRequest>,
) -> Json<AdjustmentResponseBody> {
    let outcome = state
        .coordinator
        .handle_adjustment_response(
            &user_id,
            request.category,
            request.subcategory.as_deref(),
            request.accepted,
        )
        .await;

    let outcome = match outcome {
        AdjustmentOutcome::Committed(_) => "committed",
        AdjustmentOutcome::Rejected => "rejected",
        AdjustmentOutcome::Expired => "expired",
        AdjustmentOutcome::NoProposal => "no_proposal",
    };
    Json(AdjustmentResponseBody { outcome })
}

pub async fn learning_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<LearningStatusResponse> {
    Json(LearningStatusResponse {
        status: state.learning.learning_status(&user_id).await,
    })
}

pub async fn reset_learning(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ResetLearningParams>,
) -> Json<serde_json::Value> {
    state
        .learning
        .reset_learning(&user_id, params.category, params.subcategory.as_deref())
        .await;
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Profiles and whitelist
// ============================================================================

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .store
        .active_profile(&user_id)
        .await
        .map_err(error_response)?
        .unwrap_or_else(|| UserProfile::new(&user_id, "default"));
    Ok(Json(profile))
}

pub async fn put_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PutProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let filters = match (request.filters, request.preset) {
        (Some(filters), _) => filters,
        (None, Some(preset)) => preset.filters(),
        (None, None) => {
            return Err(error_response(Error::InvalidInput(
                "either filters or preset is required".to_string(),
            )))
        }
    };

    let mut profile = state
        .store
        .active_profile(&user_id)
        .await
        .map_err(error_response)?
        .unwrap_or_else(|| UserProfile::new(&user_id, "default"));
    if let Some(name) = request.profile_name {
        profile.profile_name = name;
    }
    profile.filters = filters;
    profile.updated_at = vigil_common::time::now();

    state
        .store
        .save_profile(&profile)
        .await
        .map_err(error_response)?;
    info!(user = %user_id, profile = %profile.profile_name, "profile updated");
    Ok(Json(profile))
}

pub async fn list_whitelist(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<WhitelistResponse>, ApiError> {
    state
        .store
        .whitelist(&user_id)
        .await
        .map(|entries| Json(WhitelistResponse { entries }))
        .map_err(error_response)
}

pub async fn add_whitelist(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<AddWhitelistRequest>,
) -> Result<(StatusCode, Json<WhitelistEntry>), ApiError> {
    let entry = WhitelistEntry {
        id: Uuid::new_v4(),
        user_id,
        label: request.label,
        value_hash: request.value_hash,
        description: request.description,
        created_at: vigil_common::time::now(),
    };
    state
        .store
        .add_whitelist_entry(&entry)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn remove_whitelist(
    State(state): State<AppState>,
    Path((user_id, entry_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .store
        .remove_whitelist_entry(&user_id, entry_id)
        .await
        .map_err(error_response)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(Error::NotFound(format!(
            "whitelist entry {}",
            entry_id
        ))))
    }
}

// ============================================================================
// Detection log
// ============================================================================

pub async fn detection_log(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<DetectionLogParams>,
) -> Result<Json<DetectionLogResponse>, ApiError> {
    state
        .store
        .detection_log(&user_id, params.limit.unwrap_or(100))
        .await
        .map(|detections| Json(DetectionLogResponse { detections }))
        .map_err(error_response)
}
