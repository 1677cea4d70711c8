//! Handlers for session lifecycle and runner control.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use worldline_core::types::Timestamp;
use worldline_db::models::session::{SessionSettingsPatch, WorldSession};

use crate::error::AppResult;
use crate::services::{provider, sessions};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
    pub world_preset: String,
    pub tick_label: Option<String>,
    pub post_gen_delay_sec: Option<i64>,
    pub output_language: Option<String>,
    pub timeline_start_iso: Option<String>,
    pub timeline_step_value: Option<i64>,
    pub timeline_step_unit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub active_branch_id: Option<String>,
    pub running: bool,
    pub timeline_start_iso: String,
    pub timeline_step_value: i64,
    pub timeline_step_unit: String,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub session_id: String,
    pub title: Option<String>,
    pub world_preset: String,
    pub tick_label: String,
    pub post_gen_delay_sec: i64,
    pub running: bool,
    pub active_branch_id: Option<String>,
    pub output_language: String,
    pub timeline_start_iso: String,
    pub timeline_step_value: i64,
    pub timeline_step_unit: String,
}

impl From<&WorldSession> for SessionDetailResponse {
    fn from(session: &WorldSession) -> Self {
        Self {
            session_id: session.id.clone(),
            title: session.title.clone(),
            world_preset: session.world_preset.clone(),
            tick_label: session.tick_label.clone(),
            post_gen_delay_sec: session.post_gen_delay_sec,
            running: session.running,
            active_branch_id: session.active_branch_id.clone(),
            output_language: session.output_language.clone(),
            timeline_start_iso: session.timeline_start_iso.clone(),
            timeline_step_value: session.timeline_step_value,
            timeline_step_unit: session.timeline_step_unit.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryItem {
    pub session_id: String,
    pub title: Option<String>,
    pub running: bool,
    pub updated_at: Timestamp,
    pub created_at: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct SessionStateResponse {
    pub running: bool,
}

// ---------------------------------------------------------------------------
// POST /api/session/create
// ---------------------------------------------------------------------------

/// Create a new simulation session and its default branch.
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> AppResult<impl IntoResponse> {
    let session = sessions::create_session(
        &state.sim,
        sessions::CreateSessionInput {
            title: body.title,
            world_preset: body.world_preset,
            tick_label: body.tick_label,
            post_gen_delay_sec: body.post_gen_delay_sec,
            output_language: body.output_language,
            timeline_start_iso: body.timeline_start_iso,
            timeline_step_value: body.timeline_step_value,
            timeline_step_unit: body.timeline_step_unit,
        },
    )
    .await?;

    Ok(Json(CreateSessionResponse {
        session_id: session.id.clone(),
        active_branch_id: session.active_branch_id.clone(),
        running: session.running,
        timeline_start_iso: session.timeline_start_iso.clone(),
        timeline_step_value: session.timeline_step_value,
        timeline_step_unit: session.timeline_step_unit,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/session/history
// ---------------------------------------------------------------------------

/// List recent sessions for resume/replay.
pub async fn session_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<impl IntoResponse> {
    let sessions = sessions::list_recent(&state.sim, params.limit.unwrap_or(30)).await?;
    let items: Vec<SessionHistoryItem> = sessions
        .iter()
        .map(|session| SessionHistoryItem {
            session_id: session.id.clone(),
            title: session.title.clone(),
            running: session.running,
            updated_at: session.updated_at,
            created_at: session.created_at,
        })
        .collect();
    Ok(Json(serde_json::json!({ "sessions": items })))
}

// ---------------------------------------------------------------------------
// GET /api/session/{id}
// ---------------------------------------------------------------------------

/// Session detail including timeline and language settings.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = sessions::get_session(&state.sim, &session_id).await?;
    Ok(Json(SessionDetailResponse::from(&session)))
}

// ---------------------------------------------------------------------------
// POST /api/session/{id}/start | pause | resume
// ---------------------------------------------------------------------------

/// Start the session runner. Requires a provider with a selected model.
pub async fn start_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    sessions::get_session(&state.sim, &session_id).await?;
    provider::ensure_ready(&state.sim, &session_id).await?;
    let running = state.runner.start(&session_id).await?;
    Ok(Json(SessionStateResponse { running }))
}

/// Pause the session runner at the next round boundary.
pub async fn pause_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let running = state.runner.pause(&session_id).await?;
    Ok(Json(SessionStateResponse { running }))
}

/// Resume the session runner.
pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    sessions::get_session(&state.sim, &session_id).await?;
    provider::ensure_ready(&state.sim, &session_id).await?;
    let running = state.runner.resume(&session_id).await?;
    Ok(Json(SessionStateResponse { running }))
}

// ---------------------------------------------------------------------------
// PATCH /api/session/{id}/settings
// ---------------------------------------------------------------------------

/// Update mutable session settings.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SessionSettingsPatch>,
) -> AppResult<impl IntoResponse> {
    let session = sessions::update_settings(&state.sim, &session_id, body).await?;
    Ok(Json(SessionStateResponse {
        running: session.running,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/session/create", post(create_session))
        .route("/api/session/history", get(session_history))
        .route("/api/session/{id}", get(get_session))
        .route("/api/session/{id}/start", post(start_session))
        .route("/api/session/{id}/pause", post(pause_session))
        .route("/api/session/{id}/resume", post(resume_session))
        .route("/api/session/{id}/settings", patch(update_settings))
}
