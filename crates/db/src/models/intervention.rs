//! User intervention models.

use serde::Serialize;
use sqlx::FromRow;
use worldline_core::types::{Id, Timestamp};

/// An intervention row from the `user_interventions` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserIntervention {
    pub id: Id,
    pub session_id: Id,
    pub branch_id: Id,
    pub content: String,
    pub status: String,
    pub created_at: Timestamp,
    pub consumed_at: Option<Timestamp>,
}
