//! Adapter for the Ollama local API.

use async_trait::async_trait;
use serde_json::{json, Value};
use worldline_core::prompt::PromptMessage;

use crate::adapter::{
    get_int, GenerateOptions, GenerateResult, HttpJson, LlmAdapter, ProviderError,
    ResponseFormat, RuntimeConfig, GENERATE_TIMEOUT, LIST_MODELS_TIMEOUT,
};

pub struct OllamaAdapter {
    http: HttpJson,
}

impl OllamaAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpJson::new(),
        }
    }

    /// Join an `/api/...` path onto the base URL without doubling `/api`.
    fn join_url(base_url: Option<&str>, path: &str) -> Result<String, ProviderError> {
        let base = base_url
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .ok_or(ProviderError::BaseUrlMissing("Ollama"))?;
        let base = base.trim_end_matches('/');
        if base.ends_with("/api") && path.starts_with("/api/") {
            Ok(format!("{base}{}", &path[4..]))
        } else {
            Ok(format!("{base}{path}"))
        }
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for OllamaAdapter {
    async fn list_models(&self, cfg: &RuntimeConfig) -> Result<Vec<String>, ProviderError> {
        let url = Self::join_url(cfg.base_url.as_deref(), "/api/tags")?;
        let data = self.http.get_json(&url, &[], LIST_MODELS_TIMEOUT).await?;
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
        let url = Self::join_url(cfg.base_url.as_deref(), "/api/chat")?;
        let mut body = json!({
            "model": cfg.model_name,
            "messages": messages,
            "stream": false,
        });
        if options.response_format == ResponseFormat::Json {
            body["format"] = json!("json");
        }
        let mut wire_options = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            wire_options.insert("temperature".into(), json!(temperature));
        }
        if let Some(stop) = &options.stop {
            wire_options.insert("stop".into(), json!(stop));
        }
        if !wire_options.is_empty() {
            body["options"] = Value::Object(wire_options);
        }

        let data = self.http.post_json(&url, &[], &body, GENERATE_TIMEOUT).await?;
        let content = data
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ProviderError::Parse("Provider returned empty content.".into()))?
            .to_string();

        Ok(GenerateResult {
            text: content,
            token_in: get_int(&data, "prompt_eval_count"),
            token_out: get_int(&data, "eval_count"),
            raw: data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_deduplicates_api() {
        assert_eq!(
            OllamaAdapter::join_url(Some("http://localhost:11434"), "/api/tags").unwrap(),
            "http://localhost:11434/api/tags"
        );
        assert_eq!(
            OllamaAdapter::join_url(Some("http://localhost:11434/api/"), "/api/chat").unwrap(),
            "http://localhost:11434/api/chat"
        );
        assert!(OllamaAdapter::join_url(None, "/api/tags").is_err());
    }
}
