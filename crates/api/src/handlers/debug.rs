//! Debug endpoints exposing the runtime-tunable, non-secret settings.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::config::RuntimeSettingsPatch;
use crate::error::AppResult;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/debug/settings
// ---------------------------------------------------------------------------

/// Current runtime settings. Secrets are not part of this surface.
pub async fn get_settings(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let settings = state.sim.runtime.read().await.clone();
    Ok(Json(settings))
}

// ---------------------------------------------------------------------------
// PATCH /api/debug/settings
// ---------------------------------------------------------------------------

/// Apply a partial runtime settings update.
///
/// Consumers (event dice, prompt memory budget) read these on every round,
/// so the change takes effect on the next round with no restart.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<RuntimeSettingsPatch>,
) -> AppResult<impl IntoResponse> {
    let mut settings = state.sim.runtime.write().await;
    settings.apply(patch);
    tracing::info!("Runtime settings updated");
    Ok(Json(settings.clone()))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/debug/settings",
        get(get_settings).patch(update_settings),
    )
}
