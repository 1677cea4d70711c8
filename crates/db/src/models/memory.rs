//! Long-term memory models.

use sqlx::FromRow;
use worldline_core::types::{Id, Timestamp};

/// A memory snippet row keyed by session/branch/message.
#[derive(Debug, Clone, FromRow)]
pub struct MemoryItem {
    pub id: Id,
    pub session_id: Id,
    pub branch_id: Id,
    pub source_message_id: Id,
    pub source_message_seq: i64,
    pub source_role: String,
    pub content: String,
    pub content_hash: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub invalidated_at: Option<Timestamp>,
}

/// Vector payload associated with one memory item.
#[derive(Debug, Clone, FromRow)]
pub struct MemoryEmbedding {
    pub id: Id,
    pub memory_item_id: Id,
    pub provider: String,
    pub model_name: String,
    pub dim: i64,
    pub vector_json: String,
    pub vector_norm: f64,
    pub created_at: Timestamp,
}

/// A memory item joined with its stored vector, as retrieval reads it.
#[derive(Debug, Clone, FromRow)]
pub struct MemoryItemWithVector {
    pub id: Id,
    pub source_message_seq: i64,
    pub content: String,
    pub vector_json: String,
    pub vector_norm: f64,
}
