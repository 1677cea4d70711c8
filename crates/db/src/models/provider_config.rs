//! Provider configuration models.

use serde::Serialize;
use sqlx::FromRow;
use worldline_core::types::{Id, Timestamp};

/// A provider binding row from the `provider_configs` table.
///
/// `api_key_encrypted` holds ciphertext only; the plaintext key never
/// reaches this struct.
#[derive(Debug, Clone, FromRow)]
pub struct ProviderConfig {
    pub id: Id,
    pub session_id: Id,
    pub provider: String,
    pub base_url: Option<String>,
    pub api_key_encrypted: Option<String>,
    pub model_name: Option<String>,
    pub extra_json: Option<String>,
    pub updated_at: Timestamp,
}

/// Client-facing view of a provider binding; reports only whether a key is
/// configured, never the key itself.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfigView {
    pub provider: String,
    pub base_url: Option<String>,
    pub model_name: Option<String>,
    pub has_api_key: bool,
}

impl From<&ProviderConfig> for ProviderConfigView {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            base_url: config.base_url.clone(),
            model_name: config.model_name.clone(),
            has_api_key: config
                .api_key_encrypted
                .as_deref()
                .is_some_and(|token| !token.is_empty()),
        }
    }
}
