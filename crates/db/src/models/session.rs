//! Session models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use worldline_core::types::{Id, Timestamp};

/// A session row from the `world_sessions` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WorldSession {
    pub id: Id,
    pub title: Option<String>,
    pub world_preset: String,
    pub running: bool,
    pub tick_label: String,
    pub post_gen_delay_sec: i64,
    pub active_branch_id: Option<Id>,
    pub output_language: String,
    pub timeline_start_iso: String,
    pub timeline_step_value: i64,
    pub timeline_step_unit: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a session (values already resolved against defaults).
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Id,
    pub title: Option<String>,
    pub world_preset: String,
    pub tick_label: String,
    pub post_gen_delay_sec: i64,
    pub active_branch_id: Id,
    pub output_language: String,
    pub timeline_start_iso: String,
    pub timeline_step_value: i64,
    pub timeline_step_unit: String,
}

/// Partial update of mutable session settings (absent fields untouched).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSettingsPatch {
    pub tick_label: Option<String>,
    pub post_gen_delay_sec: Option<i64>,
    pub output_language: Option<String>,
    pub timeline_start_iso: Option<String>,
    pub timeline_step_value: Option<i64>,
    pub timeline_step_unit: Option<String>,
}
