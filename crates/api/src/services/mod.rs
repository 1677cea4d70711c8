//! Application services mapping commands onto the store, providers, runner,
//! and event bus.

pub mod branches;
pub mod provider;
pub mod sessions;
pub mod simulation;

use serde::Serialize;
use serde_json::Value;

use worldline_core::report::parse_storage_snapshot;
use worldline_core::types::{Id, Timestamp};
use worldline_db::models::message::TimelineMessage;

/// Client-facing shape of a timeline message.
///
/// The stored snapshot JSON column is decoded into a structured object;
/// clients never see the raw storage string.
#[derive(Debug, Clone, Serialize)]
pub struct MessageOut {
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
    pub report_snapshot: Option<Value>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
}

impl From<&TimelineMessage> for MessageOut {
    fn from(message: &TimelineMessage) -> Self {
        let report_snapshot = parse_storage_snapshot(message.report_snapshot_json.as_deref())
            .and_then(|snapshot| serde_json::to_value(snapshot).ok());
        Self {
            id: message.id.clone(),
            session_id: message.session_id.clone(),
            branch_id: message.branch_id.clone(),
            seq: message.seq,
            role: message.role.clone(),
            content: message.content.clone(),
            time_jump_label: message.time_jump_label.clone(),
            model_provider: message.model_provider.clone(),
            model_name: message.model_name.clone(),
            token_in: message.token_in,
            token_out: message.token_out,
            is_user_edited: message.is_user_edited,
            report_snapshot,
            created_at: message.created_at,
            edited_at: message.edited_at,
        }
    }
}

/// JSON payload for message events on the bus.
pub fn message_event_payload(message: &TimelineMessage) -> Value {
    serde_json::to_value(MessageOut::from(message)).unwrap_or(Value::Null)
}
