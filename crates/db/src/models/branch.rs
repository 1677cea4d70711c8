//! Branch models.

use serde::Serialize;
use sqlx::FromRow;
use worldline_core::types::{Id, Timestamp};

/// A branch row from the `branches` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Branch {
    pub id: Id,
    pub session_id: Id,
    pub name: String,
    pub parent_branch_id: Option<Id>,
    pub fork_from_message_id: Option<Id>,
    pub is_archived: bool,
    pub created_at: Timestamp,
}

/// Input for creating a branch.
#[derive(Debug, Clone)]
pub struct NewBranch {
    pub id: Id,
    pub session_id: Id,
    pub name: String,
    pub parent_branch_id: Option<Id>,
    pub fork_from_message_id: Option<Id>,
}
