//! Repository for timeline message persistence.
//!
//! Sequence numbers are dense per branch: `append` computes
//! `COALESCE(MAX(seq), 0) + 1` and inserts in the same transaction. The
//! unique `(branch_id, seq)` constraint catches racing writers; callers
//! retry the whole transaction a bounded number of times via
//! [`is_unique_violation`].

use sqlx::SqliteConnection;
use worldline_core::types::{new_id, utc_now};

use crate::models::message::{NewMessage, TimelineMessage};

/// Column list for message queries.
const COLUMNS: &str = "id, session_id, branch_id, seq, role, content, \
    time_jump_label, model_provider, model_name, token_in, token_out, \
    is_user_edited, report_snapshot_json, created_at, edited_at";

/// How many times callers should retry an append transaction that lost a
/// sequence race.
pub const APPEND_RETRIES: u32 = 3;

/// True when the error is the `(branch_id, seq)` unique-constraint violation
/// raised by a lost append race.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Provides persistence for timeline messages.
pub struct MessageRepo;

impl MessageRepo {
    /// Next dense sequence number for a branch.
    async fn next_seq(conn: &mut SqliteConnection, branch_id: &str) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM timeline_messages WHERE branch_id = ?",
        )
        .bind(branch_id)
        .fetch_one(conn)
        .await?;
        Ok(row.0)
    }

    /// Current maximum sequence number (0 for an empty branch).
    pub async fn max_seq(conn: &mut SqliteConnection, branch_id: &str) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM timeline_messages WHERE branch_id = ?")
                .bind(branch_id)
                .fetch_one(conn)
                .await?;
        Ok(row.0)
    }

    /// Insert a message with the next sequence number, returning the row.
    ///
    /// Single attempt; run inside a transaction and retry on
    /// [`is_unique_violation`] up to [`APPEND_RETRIES`] times.
    pub async fn append(
        conn: &mut SqliteConnection,
        input: &NewMessage,
    ) -> Result<TimelineMessage, sqlx::Error> {
        let seq = Self::next_seq(conn, &input.branch_id).await?;
        let query = format!(
            "INSERT INTO timeline_messages
                (id, session_id, branch_id, seq, role, content, time_jump_label,
                 model_provider, model_name, token_in, token_out,
                 is_user_edited, report_snapshot_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TimelineMessage>(&query)
            .bind(new_id())
            .bind(&input.session_id)
            .bind(&input.branch_id)
            .bind(seq)
            .bind(input.role)
            .bind(&input.content)
            .bind(&input.time_jump_label)
            .bind(&input.model_provider)
            .bind(&input.model_name)
            .bind(input.token_in)
            .bind(input.token_out)
            .bind(&input.report_snapshot_json)
            .bind(utc_now())
            .fetch_one(conn)
            .await
    }

    /// Most recent messages for a branch, returned in ascending seq order.
    pub async fn list_recent(
        conn: &mut SqliteConnection,
        branch_id: &str,
        limit: i64,
    ) -> Result<Vec<TimelineMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM timeline_messages
             WHERE branch_id = ?
             ORDER BY seq DESC
             LIMIT ?"
        );
        let mut rows = sqlx::query_as::<_, TimelineMessage>(&query)
            .bind(branch_id)
            .bind(limit)
            .fetch_all(conn)
            .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Branch messages from seq 1 to `max_seq`, ascending.
    pub async fn list_up_to_seq(
        conn: &mut SqliteConnection,
        branch_id: &str,
        max_seq: i64,
    ) -> Result<Vec<TimelineMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM timeline_messages
             WHERE branch_id = ? AND seq <= ?
             ORDER BY seq ASC"
        );
        sqlx::query_as::<_, TimelineMessage>(&query)
            .bind(branch_id)
            .bind(max_seq)
            .fetch_all(conn)
            .await
    }

    /// Fetch a message by id constrained to a branch.
    pub async fn find_in_branch(
        conn: &mut SqliteConnection,
        branch_id: &str,
        message_id: &str,
    ) -> Result<Option<TimelineMessage>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM timeline_messages WHERE id = ? AND branch_id = ?");
        sqlx::query_as::<_, TimelineMessage>(&query)
            .bind(message_id)
            .bind(branch_id)
            .fetch_optional(conn)
            .await
    }

    /// Fetch the latest message in a branch.
    pub async fn find_last(
        conn: &mut SqliteConnection,
        branch_id: &str,
    ) -> Result<Option<TimelineMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM timeline_messages
             WHERE branch_id = ?
             ORDER BY seq DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, TimelineMessage>(&query)
            .bind(branch_id)
            .fetch_optional(conn)
            .await
    }

    /// Delete and return the latest message in a branch.
    ///
    /// Removing the max-seq row preserves density: the remaining set is
    /// exactly `1..N-1`.
    pub async fn delete_last(
        conn: &mut SqliteConnection,
        branch_id: &str,
    ) -> Result<Option<TimelineMessage>, sqlx::Error> {
        let Some(message) = Self::find_last(&mut *conn, branch_id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM timeline_messages WHERE id = ?")
            .bind(&message.id)
            .execute(conn)
            .await?;
        Ok(Some(message))
    }

    /// Copy source messages into a target branch preserving sequence numbers.
    pub async fn clone_to_branch(
        conn: &mut SqliteConnection,
        sources: &[TimelineMessage],
        session_id: &str,
        target_branch_id: &str,
    ) -> Result<Vec<TimelineMessage>, sqlx::Error> {
        let mut copied = Vec::with_capacity(sources.len());
        for source in sources {
            let query = format!(
                "INSERT INTO timeline_messages
                    (id, session_id, branch_id, seq, role, content, time_jump_label,
                     model_provider, model_name, token_in, token_out,
                     is_user_edited, report_snapshot_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING {COLUMNS}"
            );
            let row = sqlx::query_as::<_, TimelineMessage>(&query)
                .bind(new_id())
                .bind(session_id)
                .bind(target_branch_id)
                .bind(source.seq)
                .bind(&source.role)
                .bind(&source.content)
                .bind(&source.time_jump_label)
                .bind(&source.model_provider)
                .bind(&source.model_name)
                .bind(source.token_in)
                .bind(source.token_out)
                .bind(source.is_user_edited)
                .bind(&source.report_snapshot_json)
                .bind(utc_now())
                .fetch_one(&mut *conn)
                .await?;
            copied.push(row);
        }
        Ok(copied)
    }

    /// Replace content and snapshot of a message, marking it user-edited.
    /// The sequence number never changes.
    pub async fn edit(
        conn: &mut SqliteConnection,
        message_id: &str,
        content: &str,
        report_snapshot_json: Option<&str>,
    ) -> Result<Option<TimelineMessage>, sqlx::Error> {
        let query = format!(
            "UPDATE timeline_messages SET
                content = ?,
                report_snapshot_json = ?,
                is_user_edited = 1,
                edited_at = ?
             WHERE id = ?
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TimelineMessage>(&query)
            .bind(content)
            .bind(report_snapshot_json)
            .bind(utc_now())
            .bind(message_id)
            .fetch_optional(conn)
            .await
    }

    /// Persist a backfilled snapshot for an existing message without marking
    /// it edited (used when old rows predate snapshot storage).
    pub async fn set_snapshot(
        conn: &mut SqliteConnection,
        message_id: &str,
        report_snapshot_json: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE timeline_messages SET report_snapshot_json = ? WHERE id = ?")
            .bind(report_snapshot_json)
            .bind(message_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
