//! Handlers for per-session provider configuration.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::provider;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetProviderRequest {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelsParams {
    pub provider: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectModelRequest {
    pub model_name: String,
}

// ---------------------------------------------------------------------------
// POST /api/provider/{id}/set
// ---------------------------------------------------------------------------

/// Bind a provider to the session, validating the configuration upstream.
pub async fn set_provider(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SetProviderRequest>,
) -> AppResult<impl IntoResponse> {
    let view = provider::set_provider(
        &state.sim,
        &session_id,
        &body.provider,
        body.api_key,
        body.base_url,
        body.model_name,
    )
    .await?;
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// GET /api/provider/{id}/models?provider=...
// ---------------------------------------------------------------------------

/// List models from the configured provider; broadcasts `models_loaded`.
pub async fn list_models(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<ModelsParams>,
) -> AppResult<impl IntoResponse> {
    let models = provider::list_models(&state.sim, &session_id, &params.provider).await?;
    Ok(Json(serde_json::json!({ "models": models })))
}

// ---------------------------------------------------------------------------
// POST /api/provider/{id}/select-model
// ---------------------------------------------------------------------------

/// Select the generation model, validated against the live listing.
pub async fn select_model(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SelectModelRequest>,
) -> AppResult<impl IntoResponse> {
    let view = provider::select_model(&state.sim, &session_id, &body.model_name).await?;
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// GET /api/provider/{id}/current
// ---------------------------------------------------------------------------

/// Current binding; never echoes the key, only `has_api_key`.
pub async fn current_provider(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let view = provider::current(&state.sim, &session_id).await?;
    Ok(Json(view))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/provider/{id}/set", post(set_provider))
        .route("/api/provider/{id}/models", get(list_models))
        .route("/api/provider/{id}/select-model", post(select_model))
        .route("/api/provider/{id}/current", get(current_provider))
}
