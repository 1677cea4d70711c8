//! The provider capability: configuration, options, results, errors, and the
//! shared HTTP plumbing every wire adapter builds on.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use worldline_core::crypto::ApiKey;
use worldline_core::prompt::PromptMessage;
use worldline_core::sanitize::redact_secrets;

/// Timeout for model-registry listings.
pub const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for generation calls; bounds the runner's only long suspension
/// point so shutdown can never hang on a dead provider.
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(90);

/// Longest provider error body excerpt surfaced to clients.
const BODY_EXCERPT_LIMIT: usize = 512;

// ---------------------------------------------------------------------------
// Provider kinds
// ---------------------------------------------------------------------------

/// Supported provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Ollama,
    Gemini,
    Mock,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Mock => "mock",
        }
    }

    /// Parse a provider tag (case-insensitive).
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "ollama" => Ok(ProviderKind::Ollama),
            "gemini" => Ok(ProviderKind::Gemini),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }

    /// Whether this provider refuses requests without an API key.
    pub fn requires_api_key(self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::DeepSeek | ProviderKind::Gemini
        )
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config, options, result
// ---------------------------------------------------------------------------

/// Everything an adapter needs for one call. No hidden global state.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub provider: ProviderKind,
    pub model_name: String,
    pub base_url: Option<String>,
    pub api_key: Option<ApiKey>,
    pub extra: Option<Value>,
}

/// Requested response body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Json,
    Text,
}

/// Generation tuning options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Soft output budget; enforced through the prompt, not the wire.
    pub max_output_chars: Option<u32>,
    pub temperature: Option<f32>,
    pub response_format: ResponseFormat,
    pub stop: Option<Vec<String>>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_output_chars: None,
            temperature: None,
            response_format: ResponseFormat::Json,
            stop: None,
        }
    }
}

/// Result of a generation call.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub token_in: Option<i64>,
    pub token_out: Option<i64>,
    /// The decoded provider response, for diagnostics.
    pub raw: Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Normalized provider failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key is required for {0}.")]
    ApiKeyRequired(&'static str),

    #[error("Base URL is required for {0}.")]
    BaseUrlMissing(&'static str),

    /// Non-retryable 4xx from the provider; the message is a sanitized
    /// excerpt of the response body.
    #[error("Provider returned {status}: {message}")]
    BadStatus { status: u16, message: String },

    /// 5xx from the provider; the runner retries with backoff.
    #[error("Provider returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Provider rate limited the request: {message}")]
    RateLimit { message: String },

    #[error("Provider request timed out.")]
    Timeout,

    #[error("Provider connection failed.")]
    Connection,

    /// The response decoded but a required field is missing or malformed.
    #[error("Provider response invalid: {0}")]
    Parse(String),

    #[error("No models returned by provider.")]
    NoModels,

    #[error("Unsupported provider: {0}")]
    Unsupported(String),

    #[error("Provider and model must be configured.")]
    NotReady,

    #[error("Selected model is not available: {0}")]
    ModelInvalid(String),

    #[error("APP_SECRET_KEY must be set to store API keys.")]
    SecretMissing,
}

impl ProviderError {
    /// Stable code for the error event schema.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::ApiKeyRequired(_) => "API_KEY_REQUIRED",
            ProviderError::BaseUrlMissing(_) => "PROVIDER_BASE_URL_MISSING",
            ProviderError::BadStatus { .. } => "PROVIDER_BAD_STATUS",
            ProviderError::Upstream { .. } => "PROVIDER_UPSTREAM",
            ProviderError::RateLimit { .. } => "PROVIDER_RATE_LIMIT",
            ProviderError::Timeout => "PROVIDER_TIMEOUT",
            ProviderError::Connection => "PROVIDER_CONNECTION_ERROR",
            ProviderError::Parse(_) => "PROVIDER_PARSE_ERROR",
            ProviderError::NoModels => "PROVIDER_NO_MODELS",
            ProviderError::Unsupported(_) => "PROVIDER_UNSUPPORTED",
            ProviderError::NotReady => "PROVIDER_NOT_READY",
            ProviderError::ModelInvalid(_) => "PROVIDER_MODEL_INVALID",
            ProviderError::SecretMissing => "APP_SECRET_MISSING",
        }
    }

    /// Whether the runner should retry with backoff.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Upstream { .. }
                | ProviderError::RateLimit { .. }
                | ProviderError::Timeout
                | ProviderError::Connection
        )
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// The uniform provider capability.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// List chat-capable model names from the provider registry.
    async fn list_models(&self, cfg: &RuntimeConfig) -> Result<Vec<String>, ProviderError>;

    /// Produce one completion for the role-tagged message list.
    async fn generate(
        &self,
        cfg: &RuntimeConfig,
        messages: &[PromptMessage],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError>;
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

/// Thin JSON-over-HTTP client with normalized error classification.
pub(crate) struct HttpJson {
    client: reqwest::Client,
}

impl HttpJson {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// GET a JSON document.
    pub(crate) async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Self::decode(request.send().await).await
    }

    /// POST a JSON body, returning the decoded JSON response.
    pub(crate) async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let mut request = self.client.post(url).timeout(timeout).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Self::decode(request.send().await).await
    }

    async fn decode(
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value, ProviderError> {
        let response = result.map_err(classify_transport_error)?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status_error(status.as_u16(), &body));
        }
        response
            .json::<Value>()
            .await
            .map_err(|_| ProviderError::Parse("Invalid JSON from provider.".into()))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Connection
    }
}

/// Build a normalized error from an HTTP status and response body.
pub(crate) fn classify_status_error(status: u16, body: &str) -> ProviderError {
    let message = extract_response_message(body);
    match status {
        408 => ProviderError::Timeout,
        429 => ProviderError::RateLimit { message },
        s if s >= 500 => ProviderError::Upstream { status: s, message },
        s => ProviderError::BadStatus { status: s, message },
    }
}

/// Extract a concise, sanitized message from a provider error payload.
///
/// Looks for `error.message`, `error.code`, a string `error`, or `message`;
/// falls back to the raw body. Output is capped at 512 chars and stripped of
/// key-shaped substrings.
fn extract_response_message(body: &str) -> String {
    let text = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            let from_error = match map.get("error") {
                Some(Value::Object(error)) => error
                    .get("message")
                    .or_else(|| error.get("code"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Some(Value::String(error)) if !error.trim().is_empty() => {
                    Some(error.trim().to_string())
                }
                _ => None,
            };
            from_error
                .or_else(|| {
                    map.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| body.trim().to_string())
        }
        _ => body.trim().to_string(),
    };
    let text = if text.is_empty() {
        "Unknown error from provider.".to_string()
    } else {
        text
    };
    let excerpt: String = text.chars().take(BODY_EXCERPT_LIMIT).collect();
    redact_secrets(&excerpt)
}

/// Read an integer field from a JSON object, tolerating absence.
pub(crate) fn get_int(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

/// Require a configured API key or fail with the provider's name.
pub(crate) fn require_api_key<'a>(
    cfg: &'a RuntimeConfig,
    provider_name: &'static str,
) -> Result<&'a str, ProviderError> {
    match &cfg.api_key {
        Some(key) if !key.is_empty() => Ok(key.expose()),
        _ => Err(ProviderError::ApiKeyRequired(provider_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!(ProviderKind::parse("OpenAI").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse(" mock ").unwrap(), ProviderKind::Mock);
        assert!(matches!(
            ProviderKind::parse("claude"),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn status_classification_matches_retry_policy() {
        assert!(classify_status_error(503, "{}").retryable());
        assert!(classify_status_error(429, "{}").retryable());
        assert!(matches!(classify_status_error(408, "{}"), ProviderError::Timeout));
        let bad = classify_status_error(401, r#"{"error":{"message":"bad key"}}"#);
        assert!(!bad.retryable());
        assert!(matches!(
            bad,
            ProviderError::BadStatus { status: 401, ref message } if message == "bad key"
        ));
    }

    #[test]
    fn error_messages_are_truncated_and_redacted() {
        let long_body = format!("{{\"message\":\"{}\"}}", "x".repeat(2000));
        match classify_status_error(400, &long_body) {
            ProviderError::BadStatus { message, .. } => {
                assert_eq!(message.chars().count(), 512);
            }
            other => panic!("unexpected {other:?}"),
        }

        match classify_status_error(400, r#"{"message":"leaked sk-abc123def"}"#) {
            ProviderError::BadStatus { message, .. } => {
                assert_eq!(message, "leaked sk-***");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ProviderError::Timeout.code(), "PROVIDER_TIMEOUT");
        assert_eq!(ProviderError::NotReady.code(), "PROVIDER_NOT_READY");
        assert_eq!(
            ProviderError::ApiKeyRequired("OpenAI").code(),
            "API_KEY_REQUIRED"
        );
    }

    #[test]
    fn require_api_key_rejects_missing_and_empty() {
        let mut cfg = RuntimeConfig {
            provider: ProviderKind::OpenAi,
            model_name: "m".into(),
            base_url: Some("https://api.openai.com".into()),
            api_key: None,
            extra: None,
        };
        assert!(require_api_key(&cfg, "OpenAI").is_err());
        cfg.api_key = Some(worldline_core::crypto::ApiKey::new(""));
        assert!(require_api_key(&cfg, "OpenAI").is_err());
        cfg.api_key = Some(worldline_core::crypto::ApiKey::new("sk-x"));
        assert_eq!(require_api_key(&cfg, "OpenAI").unwrap(), "sk-x");
    }
}
