//! Session lifecycle: create, inspect, update settings.

use chrono::{DateTime, Utc};
use worldline_core::error::CoreError;
use worldline_core::sanitize::sanitize_text;
use worldline_core::types::{new_id, utc_now, StepUnit};
use worldline_db::models::branch::NewBranch;
use worldline_db::models::session::{NewSession, SessionSettingsPatch, WorldSession};
use worldline_db::repositories::{BranchRepo, SessionRepo};

use crate::error::{AppError, AppResult};
use crate::state::SimContext;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_PRESET_LEN: usize = 8000;
pub const MAX_TICK_LABEL_LEN: usize = 50;

/// Raw creation input as the transport hands it over.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionInput {
    pub title: Option<String>,
    pub world_preset: String,
    pub tick_label: Option<String>,
    pub post_gen_delay_sec: Option<i64>,
    pub output_language: Option<String>,
    pub timeline_start_iso: Option<String>,
    pub timeline_step_value: Option<i64>,
    pub timeline_step_unit: Option<String>,
}

/// Create a session together with its `main` branch.
pub async fn create_session(
    ctx: &SimContext,
    input: CreateSessionInput,
) -> AppResult<WorldSession> {
    let world_preset = sanitize_text(&input.world_preset, MAX_PRESET_LEN);
    if world_preset.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "world_preset must not be empty".into(),
        )));
    }

    let runtime = ctx.runtime.read().await;
    let tick_label = sanitize_text(
        input.tick_label.as_deref().unwrap_or(&runtime.default_tick_label),
        MAX_TICK_LABEL_LEN,
    );
    let post_gen_delay_sec = input
        .post_gen_delay_sec
        .unwrap_or(runtime.default_post_gen_delay_sec)
        .max(0);
    drop(runtime);

    let session_id = new_id();
    let branch_id = new_id();
    let new_session = NewSession {
        id: session_id,
        title: Some(sanitize_text(input.title.as_deref().unwrap_or(""), MAX_TITLE_LEN))
            .filter(|title| !title.is_empty()),
        world_preset,
        tick_label,
        post_gen_delay_sec,
        active_branch_id: branch_id.clone(),
        output_language: normalize_language(
            input.output_language.as_deref(),
            &ctx.config.default_output_language,
        ),
        timeline_start_iso: normalize_timeline_start(input.timeline_start_iso.as_deref()),
        timeline_step_value: input.timeline_step_value.unwrap_or(1).max(1),
        timeline_step_unit: StepUnit::parse_or_month(
            input.timeline_step_unit.as_deref().unwrap_or("month"),
        )
        .as_str()
        .to_string(),
    };

    let mut tx = ctx.pool.begin().await?;
    let session = SessionRepo::create(&mut tx, &new_session).await?;
    BranchRepo::create(
        &mut tx,
        &NewBranch {
            id: branch_id,
            session_id: session.id.clone(),
            name: "main".into(),
            parent_branch_id: None,
            fork_from_message_id: None,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(session_id = %session.id, "Session created");
    Ok(session)
}

/// Fetch a session or fail with 404.
pub async fn get_session(ctx: &SimContext, session_id: &str) -> AppResult<WorldSession> {
    let mut conn = ctx.pool.acquire().await?;
    SessionRepo::find_by_id(&mut conn, session_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: session_id.to_string(),
        }))
}

/// Recent sessions for the history listing.
pub async fn list_recent(ctx: &SimContext, limit: i64) -> AppResult<Vec<WorldSession>> {
    let mut conn = ctx.pool.acquire().await?;
    Ok(SessionRepo::list_recent(&mut conn, limit.clamp(1, 200)).await?)
}

/// Apply a partial settings update.
pub async fn update_settings(
    ctx: &SimContext,
    session_id: &str,
    mut patch: SessionSettingsPatch,
) -> AppResult<WorldSession> {
    if let Some(tick_label) = patch.tick_label.as_deref() {
        let sanitized = sanitize_text(tick_label, MAX_TICK_LABEL_LEN);
        if sanitized.is_empty() {
            return Err(AppError::Core(CoreError::Validation(
                "tick_label must not be empty".into(),
            )));
        }
        patch.tick_label = Some(sanitized);
    }
    if let Some(delay) = patch.post_gen_delay_sec {
        if delay < 0 {
            return Err(AppError::Core(CoreError::Validation(
                "post_gen_delay_sec must be non-negative".into(),
            )));
        }
    }
    if let Some(step_value) = patch.timeline_step_value {
        if step_value < 1 {
            return Err(AppError::Core(CoreError::Validation(
                "timeline_step_value must be at least 1".into(),
            )));
        }
    }
    if let Some(language) = patch.output_language.as_deref() {
        patch.output_language = Some(normalize_language(
            Some(language),
            &ctx.config.default_output_language,
        ));
    }
    if let Some(start) = patch.timeline_start_iso.as_deref() {
        patch.timeline_start_iso = Some(normalize_timeline_start(Some(start)));
    }
    if let Some(unit) = patch.timeline_step_unit.as_deref() {
        patch.timeline_step_unit = Some(StepUnit::parse_or_month(unit).as_str().to_string());
    }

    let mut conn = ctx.pool.acquire().await?;
    SessionRepo::update_settings(&mut conn, session_id, &patch)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: session_id.to_string(),
        }))
}

fn normalize_language(value: Option<&str>, default: &str) -> String {
    let normalized = value
        .unwrap_or("")
        .trim()
        .to_lowercase()
        .replace('_', "-");
    if normalized.is_empty() {
        default.to_string()
    } else {
        normalized
    }
}

fn normalize_timeline_start(value: Option<&str>) -> String {
    let raw = value.unwrap_or("").trim();
    if raw.is_empty() {
        return utc_now().to_rfc3339();
    }
    let candidate = raw.replace('Z', "+00:00");
    match DateTime::parse_from_rfc3339(&candidate) {
        Ok(parsed) => parsed.with_timezone(&Utc).to_rfc3339(),
        Err(_) => utc_now().to_rfc3339(),
    }
}
