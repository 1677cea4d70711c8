//! Repository for queued user interventions.

use sqlx::SqliteConnection;
use worldline_core::types::{new_id, utc_now, InterventionStatus};

use crate::models::intervention::UserIntervention;

/// Column list for intervention queries.
const COLUMNS: &str = "id, session_id, branch_id, content, status, created_at, consumed_at";

/// FIFO cap on interventions handed to one round.
const PENDING_LIMIT: i64 = 20;

/// Provides persistence for user interventions.
pub struct InterventionRepo;

impl InterventionRepo {
    /// Insert a pending intervention.
    pub async fn add(
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
        content: &str,
    ) -> Result<UserIntervention, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_interventions
                (id, session_id, branch_id, content, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserIntervention>(&query)
            .bind(new_id())
            .bind(session_id)
            .bind(branch_id)
            .bind(content)
            .bind(InterventionStatus::Pending.as_str())
            .bind(utc_now())
            .fetch_one(conn)
            .await
    }

    /// List pending interventions for a branch in FIFO order.
    pub async fn list_pending(
        conn: &mut SqliteConnection,
        branch_id: &str,
    ) -> Result<Vec<UserIntervention>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_interventions
             WHERE branch_id = ? AND status = ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        );
        sqlx::query_as::<_, UserIntervention>(&query)
            .bind(branch_id)
            .bind(InterventionStatus::Pending.as_str())
            .bind(PENDING_LIMIT)
            .fetch_all(conn)
            .await
    }

    /// Mark interventions consumed.
    ///
    /// Only rows still `pending` transition, so a row can be consumed at most
    /// once. Run inside the same transaction that persists the round's
    /// report: a rollback reverts the rows to `pending`.
    pub async fn mark_consumed(
        conn: &mut SqliteConnection,
        intervention_ids: &[String],
    ) -> Result<u64, sqlx::Error> {
        if intervention_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; intervention_ids.len()].join(", ");
        let query = format!(
            "UPDATE user_interventions
             SET status = ?, consumed_at = ?
             WHERE status = ? AND id IN ({placeholders})"
        );
        let mut q = sqlx::query(&query)
            .bind(InterventionStatus::Consumed.as_str())
            .bind(utc_now())
            .bind(InterventionStatus::Pending.as_str());
        for id in intervention_ids {
            q = q.bind(id);
        }
        let result = q.execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Fetch one intervention by id.
    pub async fn find_by_id(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<UserIntervention>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM user_interventions WHERE id = ?");
        sqlx::query_as::<_, UserIntervention>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }
}
