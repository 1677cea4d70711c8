//! Adapter for the DeepSeek OpenAI-compatible API.
//!
//! Same wire family as [`crate::openai`]; only the auth target name and the
//! default base URL differ, so the request/response helpers are shared.

use async_trait::async_trait;
use worldline_core::prompt::PromptMessage;

use crate::adapter::{
    require_api_key, GenerateOptions, GenerateResult, HttpJson, LlmAdapter, ProviderError,
    RuntimeConfig, GENERATE_TIMEOUT, LIST_MODELS_TIMEOUT,
};
use crate::openai::{build_chat_body, join_v1_url, parse_chat_completion, parse_model_ids};

pub struct DeepSeekAdapter {
    http: HttpJson,
}

impl DeepSeekAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpJson::new(),
        }
    }
}

impl Default for DeepSeekAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for DeepSeekAdapter {
    async fn list_models(&self, cfg: &RuntimeConfig) -> Result<Vec<String>, ProviderError> {
        let url = join_v1_url(cfg.base_url.as_deref(), "/v1/models", "DeepSeek")?;
        let key = require_api_key(cfg, "DeepSeek")?;
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
        let url = join_v1_url(cfg.base_url.as_deref(), "/v1/chat/completions", "DeepSeek")?;
        let key = require_api_key(cfg, "DeepSeek")?;
        let auth = format!("Bearer {key}");
        let body = build_chat_body(&cfg.model_name, messages, options);
        let data = self
            .http
            .post_json(&url, &[("Authorization", auth.as_str())], &body, GENERATE_TIMEOUT)
            .await?;
        parse_chat_completion(data)
    }
}
