//! Long-term memory collaborator.
//!
//! The runtime treats memory as an optional collaborator behind a narrow
//! hook surface. Hook failures are logged and swallowed; a generation round
//! never aborts because memory misbehaved.

mod embedder;
mod vector;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tokio::sync::RwLock;

use worldline_db::models::message::TimelineMessage;
use worldline_db::DbPool;

use crate::config::{AppConfig, MemoryMode, RuntimeSettings};

pub use embedder::DeterministicEmbedder;
pub use vector::VectorMemory;

/// Hook surface between the session runtime and long-term memory.
///
/// Write hooks take the caller's transaction connection so indexed state
/// commits and rolls back with the triggering operation.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Whether retrieval can ever return snippets.
    fn enabled(&self) -> bool;

    /// Snippets relevant to the upcoming round, best match first.
    /// Returns an empty list on any internal failure.
    async fn retrieve_context(
        &self,
        session_id: &str,
        branch_id: &str,
        query_text: &str,
    ) -> Vec<String>;

    /// Index a newly persisted timeline message.
    async fn on_message_persisted(&self, conn: &mut SqliteConnection, message: &TimelineMessage);

    /// Invalidate items derived from a deleted message.
    async fn on_message_deleted(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
        branch_id: &str,
        message_id: &str,
    );

    /// Inherit the source scope onto a fork, limited to `seq <= cut_seq`.
    async fn on_fork(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
        source_branch_id: &str,
        new_branch_id: &str,
        cut_seq: i64,
    );
}

// ---------------------------------------------------------------------------
// Noop implementation (MEMORY_MODE=off)
// ---------------------------------------------------------------------------

/// Disabled memory mode.
pub struct NoopMemory;

#[async_trait]
impl MemoryService for NoopMemory {
    fn enabled(&self) -> bool {
        false
    }

    async fn retrieve_context(&self, _: &str, _: &str, _: &str) -> Vec<String> {
        Vec::new()
    }

    async fn on_message_persisted(&self, _: &mut SqliteConnection, _: &TimelineMessage) {}

    async fn on_message_deleted(&self, _: &mut SqliteConnection, _: &str, _: &str, _: &str) {}

    async fn on_fork(&self, _: &mut SqliteConnection, _: &str, _: &str, _: &str, _: i64) {}
}

/// Build the memory collaborator for the configured mode.
///
/// `hybrid` currently behaves as `vector`: the graph extension point exists
/// upstream but no graph provider ships here.
pub fn create_memory_service(
    pool: DbPool,
    config: &AppConfig,
    runtime: Arc<RwLock<RuntimeSettings>>,
) -> Arc<dyn MemoryService> {
    match config.memory_mode {
        MemoryMode::Off => Arc::new(NoopMemory),
        MemoryMode::Vector | MemoryMode::Hybrid => {
            if config.embed_provider != "deterministic" {
                tracing::warn!(
                    provider = %config.embed_provider,
                    "Unsupported embed provider; falling back to deterministic"
                );
            }
            Arc::new(VectorMemory::new(
                pool,
                DeterministicEmbedder::new(config.embed_dim.max(1), config.embed_model.clone()),
                runtime,
            ))
        }
    }
}
