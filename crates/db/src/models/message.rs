//! Timeline message models.

use serde::Serialize;
use sqlx::FromRow;
use worldline_core::types::{Id, Timestamp};

/// A message row from the `timeline_messages` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TimelineMessage {
    pub id: Id,
    pub session_id: Id,
    pub branch_id: Id,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub time_jump_label: String,
    pub model_provider: Option<String>,
    pub model_name: Option<String>,
    pub token_in: Option<i64>,
    pub token_out: Option<i64>,
    pub is_user_edited: bool,
    pub report_snapshot_json: Option<String>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
}

/// Input for appending a timeline message (seq is assigned by the store).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: Id,
    pub branch_id: Id,
    pub role: &'static str,
    pub content: String,
    pub time_jump_label: String,
    pub model_provider: Option<String>,
    pub model_name: Option<String>,
    pub token_in: Option<i64>,
    pub token_out: Option<i64>,
    pub report_snapshot_json: Option<String>,
}
