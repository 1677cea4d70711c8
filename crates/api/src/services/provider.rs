//! Provider configuration workflows: bind, list models, select, inspect.

use worldline_core::crypto::ApiKey;
use worldline_core::error::CoreError;
use worldline_db::models::provider_config::{ProviderConfig, ProviderConfigView};
use worldline_db::repositories::{ProviderRepo, SessionRepo};
use worldline_events::SessionEvent;
use worldline_providers::{ProviderError, ProviderKind, RuntimeConfig};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::state::SimContext;

/// Bind (or rebind) a provider to a session.
///
/// Validates the configuration with a live `list_models` round-trip before
/// persisting. A fresh API key is encrypted; re-binding the same provider
/// without a key keeps the stored ciphertext.
pub async fn set_provider(
    ctx: &SimContext,
    session_id: &str,
    provider: &str,
    api_key: Option<String>,
    base_url: Option<String>,
    model_name: Option<String>,
) -> AppResult<ProviderConfigView> {
    let kind = ProviderKind::parse(provider)?;

    let mut conn = ctx.pool.acquire().await?;
    ensure_session_exists(&mut conn, session_id).await?;
    let existing = ProviderRepo::find_by_session(&mut conn, session_id).await?;
    drop(conn);

    let base_url = base_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| default_base_url(&ctx.config, kind));
    let encrypted_key = resolve_api_key(ctx, kind, api_key, existing.as_ref())?;
    let requested_model = model_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let runtime_cfg = RuntimeConfig {
        provider: kind,
        model_name: requested_model.unwrap_or("").to_string(),
        base_url: Some(base_url.clone()),
        api_key: decrypt_key(ctx, encrypted_key.as_deref())?,
        extra: parse_extra(existing.as_ref()),
    };
    let models = normalize_models(ctx.providers.get(kind).list_models(&runtime_cfg).await?);
    if let Some(requested) = requested_model {
        if !models.iter().any(|model| model == requested) {
            return Err(ProviderError::ModelInvalid(requested.to_string()).into());
        }
    }

    let mut conn = ctx.pool.acquire().await?;
    let config = ProviderRepo::upsert(
        &mut conn,
        session_id,
        kind.as_str(),
        Some(base_url.as_str()),
        encrypted_key.as_deref(),
        requested_model,
        existing.as_ref().and_then(|c| c.extra_json.as_deref()),
    )
    .await?;

    tracing::info!(session_id, provider = %kind, "Provider configuration updated");
    Ok(ProviderConfigView::from(&config))
}

/// Fetch available models from the configured provider and broadcast them.
pub async fn list_models(
    ctx: &SimContext,
    session_id: &str,
    provider: &str,
) -> AppResult<Vec<String>> {
    let kind = ProviderKind::parse(provider)?;
    let mut conn = ctx.pool.acquire().await?;
    let config = ProviderRepo::find_by_session(&mut conn, session_id)
        .await?
        .filter(|config| config.provider == kind.as_str())
        .ok_or(config_missing())?;
    drop(conn);

    let runtime_cfg = runtime_config_from(ctx, kind, &config, None)?;
    let models = normalize_models(ctx.providers.get(kind).list_models(&runtime_cfg).await?);

    ctx.event_bus
        .publish(
            session_id,
            SessionEvent::ModelsLoaded {
                provider: kind.as_str().to_string(),
                models: models.clone(),
            },
        )
        .await;
    Ok(models)
}

/// Select a model, validated against the provider's live listing.
pub async fn select_model(
    ctx: &SimContext,
    session_id: &str,
    model_name: &str,
) -> AppResult<ProviderConfigView> {
    let model_name = model_name.trim();
    if model_name.is_empty() {
        return Err(ProviderError::ModelInvalid("model name must not be empty".into()).into());
    }

    let mut conn = ctx.pool.acquire().await?;
    let config = ProviderRepo::find_by_session(&mut conn, session_id)
        .await?
        .ok_or(config_missing())?;
    drop(conn);

    let kind = ProviderKind::parse(&config.provider)?;
    let runtime_cfg = runtime_config_from(ctx, kind, &config, Some(model_name))?;
    let models = normalize_models(ctx.providers.get(kind).list_models(&runtime_cfg).await?);
    if !models.iter().any(|model| model == model_name) {
        return Err(ProviderError::ModelInvalid(model_name.to_string()).into());
    }

    let mut conn = ctx.pool.acquire().await?;
    let updated = ProviderRepo::update_model(&mut conn, session_id, model_name)
        .await?
        .ok_or(config_missing())?;
    Ok(ProviderConfigView::from(&updated))
}

/// Current binding, without the secret.
pub async fn current(ctx: &SimContext, session_id: &str) -> AppResult<ProviderConfigView> {
    let mut conn = ctx.pool.acquire().await?;
    let config = ProviderRepo::find_by_session(&mut conn, session_id)
        .await?
        .ok_or(config_missing())?;
    Ok(ProviderConfigView::from(&config))
}

/// Start precondition: a provider with a selected model must be bound.
pub async fn ensure_ready(ctx: &SimContext, session_id: &str) -> AppResult<()> {
    let mut conn = ctx.pool.acquire().await?;
    let ready = ProviderRepo::find_by_session(&mut conn, session_id)
        .await?
        .is_some_and(|config| {
            config
                .model_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty())
        });
    if ready {
        Ok(())
    } else {
        Err(AppError::Core(CoreError::PreconditionFailed {
            code: "NO_MODEL_SELECTED",
            message: "Provider and model must be configured before starting.".into(),
        }))
    }
}

/// Runtime configuration for a generation call.
pub async fn generation_config(ctx: &SimContext, session_id: &str) -> AppResult<RuntimeConfig> {
    let mut conn = ctx.pool.acquire().await?;
    let config = ProviderRepo::find_by_session(&mut conn, session_id)
        .await?
        .filter(|config| {
            config
                .model_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty())
        })
        .ok_or(AppError::Provider(ProviderError::NotReady))?;
    drop(conn);

    let kind = ProviderKind::parse(&config.provider)?;
    runtime_config_from(ctx, kind, &config, None)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config_missing() -> AppError {
    AppError::Core(CoreError::PreconditionFailed {
        code: "PROVIDER_CONFIG_MISSING",
        message: "Provider config not found.".into(),
    })
}

async fn ensure_session_exists(
    conn: &mut sqlx::SqliteConnection,
    session_id: &str,
) -> AppResult<()> {
    SessionRepo::find_by_id(conn, session_id)
        .await?
        .map(|_| ())
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: session_id.to_string(),
        }))
}

/// Default base URL per provider variant; the mock needs none.
pub fn default_base_url(config: &AppConfig, kind: ProviderKind) -> String {
    match kind {
        ProviderKind::OpenAi => config.openai_base_url.clone(),
        ProviderKind::Ollama => config.ollama_base_url.clone(),
        ProviderKind::DeepSeek => config.deepseek_base_url.clone(),
        ProviderKind::Gemini => config.gemini_base_url.clone(),
        ProviderKind::Mock => String::new(),
    }
}

fn runtime_config_from(
    ctx: &SimContext,
    kind: ProviderKind,
    config: &ProviderConfig,
    model_override: Option<&str>,
) -> AppResult<RuntimeConfig> {
    let base_url = config
        .base_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| default_base_url(&ctx.config, kind));
    Ok(RuntimeConfig {
        provider: kind,
        model_name: model_override
            .map(str::to_string)
            .or_else(|| config.model_name.clone())
            .unwrap_or_default(),
        base_url: Some(base_url),
        api_key: decrypt_key(ctx, config.api_key_encrypted.as_deref())?,
        extra: parse_extra(Some(config)),
    })
}

fn decrypt_key(ctx: &SimContext, encrypted: Option<&str>) -> AppResult<Option<ApiKey>> {
    match encrypted {
        Some(token) if !token.is_empty() => {
            let plain = ctx.cipher.decrypt(token)?;
            Ok(Some(ApiKey::new(plain)))
        }
        _ => Ok(None),
    }
}

fn resolve_api_key(
    ctx: &SimContext,
    kind: ProviderKind,
    api_key: Option<String>,
    existing: Option<&ProviderConfig>,
) -> AppResult<Option<String>> {
    if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
        return Ok(Some(ctx.cipher.encrypt(key.trim())));
    }
    if let Some(existing) = existing.filter(|config| config.provider == kind.as_str()) {
        if existing.api_key_encrypted.is_some() {
            return Ok(existing.api_key_encrypted.clone());
        }
    }
    if kind.requires_api_key() {
        return Err(ProviderError::ApiKeyRequired(match kind {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::DeepSeek => "DeepSeek",
            ProviderKind::Gemini => "Gemini",
            _ => "provider",
        })
        .into());
    }
    Ok(None)
}

fn parse_extra(config: Option<&ProviderConfig>) -> Option<serde_json::Value> {
    config
        .and_then(|config| config.extra_json.as_deref())
        .and_then(|raw| serde_json::from_str(raw).ok())
}

fn normalize_models(models: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    models
        .into_iter()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty() && seen.insert(model.clone()))
        .collect()
}
