//! Handlers for branch listing, forking, and switching.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::branches;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ForkRequest {
    pub source_branch_id: String,
    pub from_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub branch_id: String,
}

// ---------------------------------------------------------------------------
// GET /api/branch/{id}
// ---------------------------------------------------------------------------

/// All branches of a session plus the active branch id.
pub async fn list_branches(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (active_branch_id, branches) = branches::list_branches(&state.sim, &session_id).await?;
    Ok(Json(serde_json::json!({
        "active_branch_id": active_branch_id,
        "branches": branches,
    })))
}

// ---------------------------------------------------------------------------
// POST /api/branch/{id}/fork
// ---------------------------------------------------------------------------

/// Fork a new branch from source history up to a message boundary.
pub async fn fork_branch(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ForkRequest>,
) -> AppResult<impl IntoResponse> {
    let branch = branches::fork_branch(
        &state.sim,
        &session_id,
        &body.source_branch_id,
        body.from_message_id.as_deref(),
    )
    .await?;
    Ok(Json(branch))
}

// ---------------------------------------------------------------------------
// POST /api/branch/{id}/switch
// ---------------------------------------------------------------------------

/// Switch the active branch; the runner picks it up on the next round.
pub async fn switch_branch(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SwitchRequest>,
) -> AppResult<impl IntoResponse> {
    let active_branch_id = branches::switch_branch(&state.sim, &session_id, &body.branch_id).await?;
    Ok(Json(serde_json::json!({ "active_branch_id": active_branch_id })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/branch/{id}", get(list_branches))
        .route("/api/branch/{id}/fork", post(fork_branch))
        .route("/api/branch/{id}/switch", post(switch_branch))
}
