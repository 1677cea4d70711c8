//! Adapter for the Google Gemini API.

use async_trait::async_trait;
use serde_json::{json, Value};
use worldline_core::prompt::{PromptMessage, PromptRole};

use crate::adapter::{
    get_int, require_api_key, GenerateOptions, GenerateResult, HttpJson, LlmAdapter,
    ProviderError, ResponseFormat, RuntimeConfig, GENERATE_TIMEOUT, LIST_MODELS_TIMEOUT,
};

pub struct GeminiAdapter {
    http: HttpJson,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpJson::new(),
        }
    }

    /// Join a `/v1beta/...` path onto the base URL without doubling.
    fn join_url(base_url: Option<&str>, path: &str) -> Result<String, ProviderError> {
        let base = base_url
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .ok_or(ProviderError::BaseUrlMissing("Gemini"))?;
        let base = base.trim_end_matches('/');
        if base.ends_with("/v1beta") && path.starts_with("/v1beta/") {
            Ok(format!("{base}{}", &path[7..]))
        } else {
            Ok(format!("{base}{path}"))
        }
    }

    /// Model names on the wire carry the `models/` prefix.
    fn normalize_model(model_name: &str) -> String {
        if model_name.starts_with("models/") {
            model_name.to_string()
        } else {
            format!("models/{model_name}")
        }
    }

    /// Translate the neutral message list to Gemini `contents`, hoisting the
    /// first system message into `system_instruction`.
    fn build_payload(messages: &[PromptMessage], options: &GenerateOptions) -> Value {
        let mut system_text: Option<&str> = None;
        let mut contents = Vec::new();
        for message in messages {
            if message.role == PromptRole::System && system_text.is_none() {
                system_text = Some(&message.content);
                continue;
            }
            let role = match message.role {
                PromptRole::User => "user",
                PromptRole::System => "model",
            };
            contents.push(json!({
                "role": role,
                "parts": [{"text": message.content}],
            }));
        }
        if contents.is_empty() {
            contents.push(json!({"role": "user", "parts": [{"text": ""}]}));
        }

        let mut payload = json!({ "contents": contents });
        if let Some(text) = system_text {
            payload["system_instruction"] = json!({"parts": [{"text": text}]});
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            generation_config.insert("temperature".into(), json!(temperature));
        }
        if options.response_format == ResponseFormat::Json {
            generation_config.insert("responseMimeType".into(), json!("application/json"));
        }
        if let Some(stop) = &options.stop {
            generation_config.insert("stopSequences".into(), json!(stop));
        }
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }
        payload
    }

    fn parse_content(data: &Value) -> Result<String, ProviderError> {
        let parts = data
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Parse("No candidates returned by provider.".into()))?;

        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .collect();
        if texts.is_empty() {
            return Err(ProviderError::Parse("Provider returned empty content.".into()));
        }
        Ok(texts.join("\n"))
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for GeminiAdapter {
    async fn list_models(&self, cfg: &RuntimeConfig) -> Result<Vec<String>, ProviderError> {
        let url = Self::join_url(cfg.base_url.as_deref(), "/v1beta/models")?;
        let key = require_api_key(cfg, "Gemini")?;
        let data = self
            .http
            .get_json(&url, &[("x-goog-api-key", key)], LIST_MODELS_TIMEOUT)
            .await?;
        let models: Vec<String> = data
            .get("models")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if models.is_empty() {
            return Err(ProviderError::NoModels);
        }
        Ok(models)
    }

    async fn generate(
        &self,
        cfg: &RuntimeConfig,
        messages: &[PromptMessage],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let model = Self::normalize_model(&cfg.model_name);
        let url = Self::join_url(
            cfg.base_url.as_deref(),
            &format!("/v1beta/{model}:generateContent"),
        )?;
        let key = require_api_key(cfg, "Gemini")?;
        let payload = Self::build_payload(messages, options);
        let data = self
            .http
            .post_json(&url, &[("x-goog-api-key", key)], &payload, GENERATE_TIMEOUT)
            .await?;

        let content = Self::parse_content(&data)?;
        let usage = data.get("usageMetadata").cloned().unwrap_or(Value::Null);
        Ok(GenerateResult {
            text: content,
            token_in: get_int(&usage, "promptTokenCount"),
            token_out: get_int(&usage, "candidatesTokenCount"),
            raw: data,
        })
    }
}
