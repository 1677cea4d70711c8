//! Adapter for OpenAI-compatible chat APIs.

use async_trait::async_trait;
use serde_json::{json, Value};
use worldline_core::prompt::PromptMessage;

use crate::adapter::{
    get_int, require_api_key, GenerateOptions, GenerateResult, HttpJson, LlmAdapter,
    ProviderError, ResponseFormat, RuntimeConfig, GENERATE_TIMEOUT, LIST_MODELS_TIMEOUT,
};

pub struct OpenAiAdapter {
    http: HttpJson,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpJson::new(),
        }
    }

    fn join_url(base_url: Option<&str>, path: &str) -> Result<String, ProviderError> {
        join_v1_url(base_url, path, "OpenAI")
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    async fn list_models(&self, cfg: &RuntimeConfig) -> Result<Vec<String>, ProviderError> {
        let url = Self::join_url(cfg.base_url.as_deref(), "/v1/models")?;
        let key = require_api_key(cfg, "OpenAI")?;
        let auth = format!("Bearer {key}");
        let data = self
            .http
            .get_json(&url, &[("Authorization", auth.as_str())], LIST_MODELS_TIMEOUT)
            .await?;
        parse_model_ids(&data)
    }

    async fn generate(
        &self,
        cfg: &RuntimeConfig,
        messages: &[PromptMessage],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let url = Self::join_url(cfg.base_url.as_deref(), "/v1/chat/completions")?;
        let key = require_api_key(cfg, "OpenAI")?;
        let auth = format!("Bearer {key}");
        let body = build_chat_body(&cfg.model_name, messages, options);
        let data = self
            .http
            .post_json(&url, &[("Authorization", auth.as_str())], &body, GENERATE_TIMEOUT)
            .await?;
        parse_chat_completion(data)
    }
}

// ---------------------------------------------------------------------------
// Shared OpenAI-family wire helpers (also used by the DeepSeek adapter)
// ---------------------------------------------------------------------------

/// Join a `/v1/...` path onto a base URL without doubling an existing `/v1`.
pub(crate) fn join_v1_url(
    base_url: Option<&str>,
    path: &str,
    provider_name: &'static str,
) -> Result<String, ProviderError> {
    let base = base_url
        .map(str::trim)
        .filter(|base| !base.is_empty())
        .ok_or(ProviderError::BaseUrlMissing(provider_name))?;
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") && path.starts_with("/v1/") {
        Ok(format!("{base}{}", &path[3..]))
    } else {
        Ok(format!("{base}{path}"))
    }
}

/// `GET /v1/models` response: `{data: [{id}, ...]}`.
pub(crate) fn parse_model_ids(data: &Value) -> Result<Vec<String>, ProviderError> {
    let models: Vec<String> = data
        .get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if models.is_empty() {
        return Err(ProviderError::NoModels);
    }
    Ok(models)
}

/// Build the `POST /v1/chat/completions` request body.
pub(crate) fn build_chat_body(
    model_name: &str,
    messages: &[PromptMessage],
    options: &GenerateOptions,
) -> Value {
    let mut body = json!({
        "model": model_name,
        "messages": messages,
        "stream": false,
    });
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if options.response_format == ResponseFormat::Json {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if let Some(stop) = &options.stop {
        body["stop"] = json!(stop);
    }
    body
}

/// Decode `{choices: [{message: {content}}], usage: {...}}` defensively.
pub(crate) fn parse_chat_completion(data: Value) -> Result<GenerateResult, ProviderError> {
    let content = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ProviderError::Parse("Provider returned empty content.".into()))?
        .to_string();

    let usage = data.get("usage").cloned().unwrap_or(Value::Null);
    Ok(GenerateResult {
        text: content,
        token_in: get_int(&usage, "prompt_tokens"),
        token_out: get_int(&usage, "completion_tokens"),
        raw: data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_deduplicates_v1() {
        assert_eq!(
            join_v1_url(Some("https://api.openai.com/v1"), "/v1/models", "OpenAI").unwrap(),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            join_v1_url(Some("https://api.openai.com/"), "/v1/models", "OpenAI").unwrap(),
            "https://api.openai.com/v1/models"
        );
        assert!(matches!(
            join_v1_url(None, "/v1/models", "OpenAI"),
            Err(ProviderError::BaseUrlMissing("OpenAI"))
        ));
    }

    #[test]
    fn model_listing_requires_ids() {
        let data = serde_json::json!({"data": [{"id": "a"}, {"object": "noise"}, {"id": "b"}]});
        assert_eq!(parse_model_ids(&data).unwrap(), vec!["a", "b"]);
        assert!(matches!(
            parse_model_ids(&serde_json::json!({"data": []})),
            Err(ProviderError::NoModels)
        ));
    }

    #[test]
    fn chat_body_carries_options() {
        let messages = vec![PromptMessage {
            role: worldline_core::prompt::PromptRole::User,
            content: "hi".into(),
        }];
        let options = GenerateOptions {
            temperature: Some(0.7),
            stop: Some(vec!["END".into()]),
            ..GenerateOptions::default()
        };
        let body = build_chat_body("gpt-test", &messages, &options);
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn completion_parsing_is_defensive() {
        let ok = serde_json::json!({
            "choices": [{"message": {"content": "report"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4}
        });
        let result = parse_chat_completion(ok).unwrap();
        assert_eq!(result.text, "report");
        assert_eq!(result.token_in, Some(10));
        assert_eq!(result.token_out, Some(4));

        let missing = serde_json::json!({"choices": []});
        assert!(matches!(
            parse_chat_completion(missing),
            Err(ProviderError::Parse(_))
        ));
        let empty = serde_json::json!({"choices": [{"message": {"content": ""}}]});
        assert!(parse_chat_completion(empty).is_err());
    }
}
