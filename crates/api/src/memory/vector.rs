//! Vector memory over the SQLite-backed store.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use tokio::sync::RwLock;

use worldline_db::models::message::TimelineMessage;
use worldline_db::repositories::MemoryRepo;
use worldline_db::DbPool;

use crate::config::RuntimeSettings;
use crate::memory::{DeterministicEmbedder, MemoryService};

/// Cosine-scored retrieval over deterministic embeddings.
pub struct VectorMemory {
    pool: DbPool,
    embedder: DeterministicEmbedder,
    runtime: Arc<RwLock<RuntimeSettings>>,
}

impl VectorMemory {
    pub fn new(
        pool: DbPool,
        embedder: DeterministicEmbedder,
        runtime: Arc<RwLock<RuntimeSettings>>,
    ) -> Self {
        Self {
            pool,
            embedder,
            runtime,
        }
    }

    fn content_hash(content: &str) -> String {
        let digest = Sha256::digest(content.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    async fn try_retrieve(
        &self,
        session_id: &str,
        branch_id: &str,
        query_text: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let (max_snippets, max_chars) = {
            let runtime = self.runtime.read().await;
            (runtime.memory_max_snippets, runtime.memory_max_chars)
        };
        if max_snippets == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query_text);
        let mut conn = self.pool.acquire().await?;
        let items = MemoryRepo::list_active_with_vectors(&mut conn, session_id, branch_id).await?;

        let mut scored: Vec<(f64, String)> = items
            .into_iter()
            .filter_map(|item| {
                let vector: Vec<f64> = serde_json::from_str(&item.vector_json).ok()?;
                if vector.len() != query_vector.len() {
                    return None;
                }
                let dot: f64 = vector.iter().zip(&query_vector).map(|(a, b)| a * b).sum();
                let score = if item.vector_norm > 0.0 {
                    dot / item.vector_norm
                } else {
                    0.0
                };
                Some((score, item.content))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut snippets = Vec::new();
        let mut used_chars = 0usize;
        for (_, content) in scored.into_iter().take(max_snippets) {
            let len = content.chars().count();
            if used_chars + len > max_chars {
                break;
            }
            used_chars += len;
            snippets.push(content);
        }
        Ok(snippets)
    }
}

#[async_trait]
impl MemoryService for VectorMemory {
    fn enabled(&self) -> bool {
        true
    }

    async fn retrieve_context(
        &self,
        session_id: &str,
        branch_id: &str,
        query_text: &str,
    ) -> Vec<String> {
        match self.try_retrieve(session_id, branch_id, query_text).await {
            Ok(snippets) => snippets,
            Err(error) => {
                tracing::warn!(%error, session_id, "Memory retrieval failed; continuing without snippets");
                Vec::new()
            }
        }
    }

    async fn on_message_persisted(&self, conn: &mut SqliteConnection, message: &TimelineMessage) {
        let content = message.content.trim();
        if content.is_empty() {
            return;
        }
        let vector = self.embedder.embed(content);
        let result = MemoryRepo::insert_item(
            conn,
            &message.session_id,
            &message.branch_id,
            &message.id,
            message.seq,
            &message.role,
            content,
            &Self::content_hash(content),
            self.embedder.provider(),
            self.embedder.model_name(),
            &vector,
        )
        .await;
        if let Err(error) = result {
            tracing::warn!(%error, message_id = %message.id, "Memory indexing failed");
        }
    }

    async fn on_message_deleted(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
        message_id: &str,
    ) {
        if let Err(error) =
            MemoryRepo::invalidate_by_source(conn, session_id, branch_id, message_id).await
        {
            tracing::warn!(%error, message_id, "Memory invalidation failed");
        }
    }

    async fn on_fork(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
        source_branch_id: &str,
        new_branch_id: &str,
        cut_seq: i64,
    ) {
        if let Err(error) =
            MemoryRepo::clone_scope(conn, session_id, source_branch_id, new_branch_id, cut_seq)
                .await
        {
            tracing::warn!(%error, source_branch_id, "Memory fork inheritance failed");
        }
    }
}
