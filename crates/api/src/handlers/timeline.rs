//! Handlers for timeline reads, rollback, message edits, and interventions.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use worldline_core::error::CoreError;
use worldline_core::report::{
    normalize_report_snapshot, parse_report_snapshot, parse_storage_snapshot,
    snapshot_to_content, snapshot_to_storage_json, ReportSnapshot,
};
use worldline_core::sanitize::sanitize_text;
use worldline_core::types::Role;
use worldline_db::models::message::TimelineMessage;
use worldline_db::repositories::{BranchRepo, MessageRepo, SessionRepo};
use worldline_events::SessionEvent;

use crate::error::{AppError, AppResult};
use crate::services::{branches, message_event_payload, MessageOut};
use crate::state::AppState;

pub const MAX_EDIT_CONTENT_LEN: usize = 12_000;

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    pub branch_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BranchParam {
    pub branch_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageEditRequest {
    pub branch_id: Option<String>,
    pub content: Option<String>,
    pub report_snapshot: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct InterventionRequest {
    pub branch_id: Option<String>,
    pub content: String,
}

// ---------------------------------------------------------------------------
// GET /api/timeline/{id}?branch_id=&limit=
// ---------------------------------------------------------------------------

/// Timeline messages for the requested (or active) branch, ascending seq.
///
/// Reports persisted before snapshot storage existed get their snapshot
/// backfilled from content on the way out.
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> AppResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(200).clamp(1, 500);

    let mut conn = state.sim.pool.acquire().await?;
    let session = SessionRepo::find_by_id(&mut conn, &session_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: session_id.clone(),
        }))?;
    let branch_id = params
        .branch_id
        .or(session.active_branch_id)
        .ok_or(AppError::Core(CoreError::Validation(
            "Active branch is missing".into(),
        )))?;

    let mut messages = MessageRepo::list_recent(&mut conn, &branch_id, limit).await?;
    for message in &mut messages {
        backfill_snapshot(&mut conn, message).await?;
    }

    let payload: Vec<MessageOut> = messages.iter().map(MessageOut::from).collect();
    Ok(Json(serde_json::json!({ "messages": payload })))
}

/// Derive and persist a missing snapshot for old report rows.
async fn backfill_snapshot(
    conn: &mut sqlx::SqliteConnection,
    message: &mut TimelineMessage,
) -> AppResult<()> {
    if message.role != Role::SystemReport.as_str() {
        return Ok(());
    }
    if parse_storage_snapshot(message.report_snapshot_json.as_deref()).is_some() {
        return Ok(());
    }
    let Some(parsed) = parse_report_snapshot(&message.content, &message.time_jump_label) else {
        return Ok(());
    };
    let stored = snapshot_to_storage_json(&parsed);
    MessageRepo::set_snapshot(conn, &message.id, &stored).await?;
    message.report_snapshot_json = Some(stored);
    Ok(())
}

// ---------------------------------------------------------------------------
// DELETE /api/message/{id}/last?branch_id=
// ---------------------------------------------------------------------------

/// Delete the latest message in a branch (rollback by one step).
///
/// Returns 409 `BUSY` while the runner may be writing; the client should
/// pause first.
pub async fn delete_last_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<BranchParam>,
) -> AppResult<impl IntoResponse> {
    if state.runner.is_busy(&session_id).await {
        return Err(AppError::Core(CoreError::Busy(
            "Runner is writing to the timeline. Pause and retry deletion.".into(),
        )));
    }

    let deleted =
        branches::delete_last_message(&state.sim, &session_id, params.branch_id.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "deleted_message_id": deleted.id,
        "branch_id": deleted.branch_id,
    })))
}

// ---------------------------------------------------------------------------
// PATCH /api/message/{id}/{message_id}
// ---------------------------------------------------------------------------

/// Edit one historical message in place.
///
/// Report messages must stay valid reports: the edit is accepted as an
/// explicit snapshot object or as content that parses into one, and the
/// canonical serialization is what gets stored. Plain messages just take the
/// new content. Either way the edit re-indexes memory for this message.
pub async fn edit_message(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(body): Json<MessageEditRequest>,
) -> AppResult<impl IntoResponse> {
    let mut tx = state.sim.pool.begin().await?;

    let session = SessionRepo::find_by_id(&mut tx, &session_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: session_id.clone(),
        }))?;
    let branch_id = body
        .branch_id
        .clone()
        .or(session.active_branch_id)
        .ok_or(AppError::Core(CoreError::Validation(
            "Active branch is missing".into(),
        )))?;
    BranchRepo::find_in_session(&mut tx, &session_id, &branch_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Branch",
            id: branch_id.clone(),
        }))?;
    let message = MessageRepo::find_in_branch(&mut tx, &branch_id, &message_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Message",
            id: message_id.clone(),
        }))?;

    let (content, snapshot_json) = if message.role == Role::SystemReport.as_str() {
        let snapshot = resolve_report_edit(&message, &body)?;
        (
            sanitize_text(&snapshot_to_content(&snapshot), MAX_EDIT_CONTENT_LEN),
            Some(snapshot_to_storage_json(&snapshot)),
        )
    } else {
        let content = body.content.as_deref().ok_or(AppError::Core(
            CoreError::Validation("content is required for this message role".into()),
        ))?;
        let sanitized = sanitize_text(content, MAX_EDIT_CONTENT_LEN);
        if sanitized.is_empty() {
            return Err(AppError::Core(CoreError::Validation(
                "content must not be empty".into(),
            )));
        }
        (sanitized, None)
    };

    let edited = MessageRepo::edit(&mut tx, &message_id, &content, snapshot_json.as_deref())
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Message",
            id: message_id.clone(),
        }))?;

    // Memory sees the edit as delete-then-index of the new content.
    state
        .sim
        .memory
        .on_message_deleted(&mut tx, &session_id, &branch_id, &edited.id)
        .await;
    state.sim.memory.on_message_persisted(&mut tx, &edited).await;
    tx.commit().await?;

    state
        .sim
        .event_bus
        .publish(
            &session_id,
            SessionEvent::MessageUpdated {
                branch_id: edited.branch_id.clone(),
                message: message_event_payload(&edited),
            },
        )
        .await;

    Ok(Json(serde_json::json!({ "message": MessageOut::from(&edited) })))
}

fn resolve_report_edit(
    message: &TimelineMessage,
    body: &MessageEditRequest,
) -> AppResult<ReportSnapshot> {
    if let Some(Value::Object(map)) = &body.report_snapshot {
        return Ok(normalize_report_snapshot(map, &message.time_jump_label));
    }
    if let Some(content) = body.content.as_deref() {
        return parse_report_snapshot(content, &message.time_jump_label).ok_or(AppError::Core(
            CoreError::Validation(
                "System report edit requires valid report JSON content or report_snapshot".into(),
            ),
        ));
    }
    Err(AppError::Core(CoreError::Validation(
        "No editable field provided".into(),
    )))
}

// ---------------------------------------------------------------------------
// POST /api/intervention/{id}
// ---------------------------------------------------------------------------

/// Queue an intervention for consumption in the next generation round.
pub async fn create_intervention(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<InterventionRequest>,
) -> AppResult<impl IntoResponse> {
    let (intervention, _) = branches::enqueue_intervention(
        &state.sim,
        &session_id,
        body.branch_id.as_deref(),
        &body.content,
    )
    .await?;
    Ok(Json(serde_json::json!({
        "intervention_id": intervention.id,
        "branch_id": intervention.branch_id,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/timeline/{id}", get(get_timeline))
        .route("/api/message/{id}/last", delete(delete_last_message))
        .route("/api/message/{id}/{message_id}", patch(edit_message))
        .route("/api/intervention/{id}", post(create_intervention))
}
