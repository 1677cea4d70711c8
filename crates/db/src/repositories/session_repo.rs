//! Repository for the `world_sessions` table.

use sqlx::SqliteConnection;
use worldline_core::types::utc_now;

use crate::models::session::{NewSession, SessionSettingsPatch, WorldSession};

/// Column list for session queries.
const COLUMNS: &str = "id, title, world_preset, running, tick_label, \
    post_gen_delay_sec, active_branch_id, output_language, timeline_start_iso, \
    timeline_step_value, timeline_step_unit, created_at, updated_at";

/// Provides CRUD operations for simulation sessions.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new session, returning the created row.
    pub async fn create(
        conn: &mut SqliteConnection,
        input: &NewSession,
    ) -> Result<WorldSession, sqlx::Error> {
        let now = utc_now();
        let query = format!(
            "INSERT INTO world_sessions
                (id, title, world_preset, running, tick_label, post_gen_delay_sec,
                 active_branch_id, output_language, timeline_start_iso,
                 timeline_step_value, timeline_step_unit, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorldSession>(&query)
            .bind(&input.id)
            .bind(&input.title)
            .bind(&input.world_preset)
            .bind(&input.tick_label)
            .bind(input.post_gen_delay_sec)
            .bind(&input.active_branch_id)
            .bind(&input.output_language)
            .bind(&input.timeline_start_iso)
            .bind(input.timeline_step_value)
            .bind(&input.timeline_step_unit)
            .bind(now)
            .bind(now)
            .fetch_one(conn)
            .await
    }

    /// Find a session by its primary key.
    pub async fn find_by_id(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<WorldSession>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM world_sessions WHERE id = ?");
        sqlx::query_as::<_, WorldSession>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// List recent sessions, most recently updated first.
    pub async fn list_recent(
        conn: &mut SqliteConnection,
        limit: i64,
    ) -> Result<Vec<WorldSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM world_sessions
             ORDER BY updated_at DESC
             LIMIT ?"
        );
        sqlx::query_as::<_, WorldSession>(&query)
            .bind(limit)
            .fetch_all(conn)
            .await
    }

    /// Set the running flag. Returns the updated row, or `None` if not found.
    pub async fn update_running(
        conn: &mut SqliteConnection,
        id: &str,
        running: bool,
    ) -> Result<Option<WorldSession>, sqlx::Error> {
        let query = format!(
            "UPDATE world_sessions SET running = ?, updated_at = ?
             WHERE id = ?
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorldSession>(&query)
            .bind(running)
            .bind(utc_now())
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Apply a partial settings update. Absent fields keep their values.
    pub async fn update_settings(
        conn: &mut SqliteConnection,
        id: &str,
        patch: &SessionSettingsPatch,
    ) -> Result<Option<WorldSession>, sqlx::Error> {
        let query = format!(
            "UPDATE world_sessions SET
                tick_label = COALESCE(?, tick_label),
                post_gen_delay_sec = COALESCE(?, post_gen_delay_sec),
                output_language = COALESCE(?, output_language),
                timeline_start_iso = COALESCE(?, timeline_start_iso),
                timeline_step_value = COALESCE(?, timeline_step_value),
                timeline_step_unit = COALESCE(?, timeline_step_unit),
                updated_at = ?
             WHERE id = ?
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorldSession>(&query)
            .bind(&patch.tick_label)
            .bind(patch.post_gen_delay_sec)
            .bind(&patch.output_language)
            .bind(&patch.timeline_start_iso)
            .bind(patch.timeline_step_value)
            .bind(&patch.timeline_step_unit)
            .bind(utc_now())
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Point the session at a different active branch.
    pub async fn update_active_branch(
        conn: &mut SqliteConnection,
        id: &str,
        branch_id: &str,
    ) -> Result<Option<WorldSession>, sqlx::Error> {
        let query = format!(
            "UPDATE world_sessions SET active_branch_id = ?, updated_at = ?
             WHERE id = ?
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorldSession>(&query)
            .bind(branch_id)
            .bind(utc_now())
            .bind(id)
            .fetch_optional(conn)
            .await
    }
}
