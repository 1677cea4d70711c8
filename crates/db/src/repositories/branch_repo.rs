//! Repository for the `branches` table.

use sqlx::SqliteConnection;
use worldline_core::types::utc_now;

use crate::models::branch::{Branch, NewBranch};

/// Column list for branch queries.
const COLUMNS: &str =
    "id, session_id, name, parent_branch_id, fork_from_message_id, is_archived, created_at";

/// Provides CRUD operations for timeline branches.
pub struct BranchRepo;

impl BranchRepo {
    /// Insert a new branch, returning the created row.
    pub async fn create(
        conn: &mut SqliteConnection,
        input: &NewBranch,
    ) -> Result<Branch, sqlx::Error> {
        let query = format!(
            "INSERT INTO branches
                (id, session_id, name, parent_branch_id, fork_from_message_id,
                 is_archived, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Branch>(&query)
            .bind(&input.id)
            .bind(&input.session_id)
            .bind(&input.name)
            .bind(&input.parent_branch_id)
            .bind(&input.fork_from_message_id)
            .bind(utc_now())
            .fetch_one(conn)
            .await
    }

    /// Find a branch by id, constrained to a session.
    pub async fn find_in_session(
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
    ) -> Result<Option<Branch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM branches WHERE id = ? AND session_id = ?");
        sqlx::query_as::<_, Branch>(&query)
            .bind(branch_id)
            .bind(session_id)
            .fetch_optional(conn)
            .await
    }

    /// List all branches for a session in creation order.
    pub async fn list_by_session(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Vec<Branch>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM branches
             WHERE session_id = ?
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Branch>(&query)
            .bind(session_id)
            .fetch_all(conn)
            .await
    }

    /// Count branches for a session.
    pub async fn count_by_session(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM branches WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(conn)
            .await?;
        Ok(row.0)
    }
}
