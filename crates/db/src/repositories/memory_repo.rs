//! Repository for long-term memory items and their vectors.

use sqlx::SqliteConnection;
use worldline_core::types::{new_id, utc_now};

use crate::models::memory::{MemoryItem, MemoryItemWithVector};

/// Column list for memory item queries.
const ITEM_COLUMNS: &str = "id, session_id, branch_id, source_message_id, \
    source_message_seq, source_role, content, content_hash, is_active, \
    created_at, invalidated_at";

/// Provides persistence for the memory collaborator.
pub struct MemoryRepo;

impl MemoryRepo {
    /// Insert a memory item with its embedding vector.
    ///
    /// A duplicate `(branch_id, source_message_id, content_hash)` triple is
    /// ignored: re-indexing unchanged content is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_item(
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
        source_message_id: &str,
        source_message_seq: i64,
        source_role: &str,
        content: &str,
        content_hash: &str,
        embed_provider: &str,
        embed_model: &str,
        vector: &[f64],
    ) -> Result<Option<MemoryItem>, sqlx::Error> {
        let query = format!(
            "INSERT INTO memory_items
                (id, session_id, branch_id, source_message_id, source_message_seq,
                 source_role, content, content_hash, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
             ON CONFLICT (branch_id, source_message_id, content_hash) DO NOTHING
             RETURNING {ITEM_COLUMNS}"
        );
        let item = sqlx::query_as::<_, MemoryItem>(&query)
            .bind(new_id())
            .bind(session_id)
            .bind(branch_id)
            .bind(source_message_id)
            .bind(source_message_seq)
            .bind(source_role)
            .bind(content)
            .bind(content_hash)
            .bind(utc_now())
            .fetch_optional(&mut *conn)
            .await?;

        let Some(item) = item else {
            return Ok(None);
        };

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        let vector_json =
            serde_json::to_string(vector).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO memory_embeddings
                (id, memory_item_id, provider, model_name, dim, vector_json,
                 vector_norm, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&item.id)
        .bind(embed_provider)
        .bind(embed_model)
        .bind(vector.len() as i64)
        .bind(vector_json)
        .bind(norm)
        .bind(utc_now())
        .execute(conn)
        .await?;

        Ok(Some(item))
    }

    /// Active memory items with vectors for one session/branch scope.
    pub async fn list_active_with_vectors(
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
    ) -> Result<Vec<MemoryItemWithVector>, sqlx::Error> {
        sqlx::query_as::<_, MemoryItemWithVector>(
            "SELECT m.id, m.source_message_seq, m.content, e.vector_json, e.vector_norm
             FROM memory_items m
             JOIN memory_embeddings e ON e.memory_item_id = m.id
             WHERE m.session_id = ? AND m.branch_id = ? AND m.is_active = 1
             ORDER BY m.source_message_seq ASC",
        )
        .bind(session_id)
        .bind(branch_id)
        .fetch_all(conn)
        .await
    }

    /// Deactivate memory items derived from one source message.
    pub async fn invalidate_by_source(
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
        source_message_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE memory_items
             SET is_active = 0, invalidated_at = ?
             WHERE session_id = ? AND branch_id = ? AND source_message_id = ?
               AND is_active = 1",
        )
        .bind(utc_now())
        .bind(session_id)
        .bind(branch_id)
        .bind(source_message_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Copy a branch's active memory scope onto a fork, keeping only items
    /// whose source message falls inside the fork cut.
    pub async fn clone_scope(
        conn: &mut SqliteConnection,
        session_id: &str,
        source_branch_id: &str,
        target_branch_id: &str,
        cut_seq: i64,
    ) -> Result<Vec<MemoryItem>, sqlx::Error> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM memory_items
             WHERE session_id = ? AND branch_id = ? AND is_active = 1
               AND source_message_seq <= ?
             ORDER BY source_message_seq ASC"
        );
        let sources = sqlx::query_as::<_, MemoryItem>(&query)
            .bind(session_id)
            .bind(source_branch_id)
            .bind(cut_seq)
            .fetch_all(&mut *conn)
            .await?;

        let mut copied = Vec::with_capacity(sources.len());
        for source in &sources {
            let insert = format!(
                "INSERT INTO memory_items
                    (id, session_id, branch_id, source_message_id, source_message_seq,
                     source_role, content, content_hash, is_active, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
                 ON CONFLICT (branch_id, source_message_id, content_hash) DO NOTHING
                 RETURNING {ITEM_COLUMNS}"
            );
            let item = sqlx::query_as::<_, MemoryItem>(&insert)
                .bind(new_id())
                .bind(session_id)
                .bind(target_branch_id)
                .bind(&source.source_message_id)
                .bind(source.source_message_seq)
                .bind(&source.source_role)
                .bind(&source.content)
                .bind(&source.content_hash)
                .bind(utc_now())
                .fetch_optional(&mut *conn)
                .await?;

            if let Some(item) = item {
                sqlx::query(
                    "INSERT INTO memory_embeddings
                        (id, memory_item_id, provider, model_name, dim, vector_json,
                         vector_norm, created_at)
                     SELECT ?, ?, provider, model_name, dim, vector_json, vector_norm, ?
                     FROM memory_embeddings WHERE memory_item_id = ?",
                )
                .bind(new_id())
                .bind(&item.id)
                .bind(utc_now())
                .bind(&source.id)
                .execute(&mut *conn)
                .await?;
                copied.push(item);
            }
        }
        Ok(copied)
    }
}
