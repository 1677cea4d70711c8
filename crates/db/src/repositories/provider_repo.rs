//! Repository for per-session provider configuration.

use sqlx::SqliteConnection;
use worldline_core::types::{new_id, utc_now};

use crate::models::provider_config::ProviderConfig;

/// Column list for provider config queries.
const COLUMNS: &str =
    "id, session_id, provider, base_url, api_key_encrypted, model_name, extra_json, updated_at";

/// Provides persistence for provider bindings (1:1 with sessions).
pub struct ProviderRepo;

impl ProviderRepo {
    /// Fetch the config for a session.
    pub async fn find_by_session(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Option<ProviderConfig>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM provider_configs WHERE session_id = ?");
        sqlx::query_as::<_, ProviderConfig>(&query)
            .bind(session_id)
            .fetch_optional(conn)
            .await
    }

    /// Insert or replace the provider binding for a session.
    ///
    /// `api_key_encrypted` is ciphertext produced by the service layer; this
    /// repository never sees plaintext.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        conn: &mut SqliteConnection,
        session_id: &str,
        provider: &str,
        base_url: Option<&str>,
        api_key_encrypted: Option<&str>,
        model_name: Option<&str>,
        extra_json: Option<&str>,
    ) -> Result<ProviderConfig, sqlx::Error> {
        let query = format!(
            "INSERT INTO provider_configs
                (id, session_id, provider, base_url, api_key_encrypted,
                 model_name, extra_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (session_id) DO UPDATE SET
                provider = excluded.provider,
                base_url = excluded.base_url,
                api_key_encrypted = excluded.api_key_encrypted,
                model_name = excluded.model_name,
                extra_json = excluded.extra_json,
                updated_at = excluded.updated_at
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProviderConfig>(&query)
            .bind(new_id())
            .bind(session_id)
            .bind(provider)
            .bind(base_url)
            .bind(api_key_encrypted)
            .bind(model_name)
            .bind(extra_json)
            .bind(utc_now())
            .fetch_one(conn)
            .await
    }

    /// Update only the selected model. Returns the row, or `None` when the
    /// session has no provider config.
    pub async fn update_model(
        conn: &mut SqliteConnection,
        session_id: &str,
        model_name: &str,
    ) -> Result<Option<ProviderConfig>, sqlx::Error> {
        let query = format!(
            "UPDATE provider_configs SET model_name = ?, updated_at = ?
             WHERE session_id = ?
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProviderConfig>(&query)
            .bind(model_name)
            .bind(utc_now())
            .bind(session_id)
            .fetch_optional(conn)
            .await
    }
}
