//! LLM provider adapters.
//!
//! One adapter per wire protocol behind the polymorphic [`LlmAdapter`]
//! capability (`list_models` + `generate`). Adapters are stateless per call;
//! everything they need arrives in the [`RuntimeConfig`].

pub mod adapter;
pub mod deepseek;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use adapter::{
    GenerateOptions, GenerateResult, LlmAdapter, ProviderError, ProviderKind, ResponseFormat,
    RuntimeConfig, GENERATE_TIMEOUT, LIST_MODELS_TIMEOUT,
};

use deepseek::DeepSeekAdapter;
use gemini::GeminiAdapter;
use mock::MockAdapter;
use ollama::OllamaAdapter;
use openai::OpenAiAdapter;

/// Holds one adapter instance per provider variant.
///
/// The mock adapter is exposed directly so tests can inspect captured
/// prompts and arm failure injection.
pub struct ProviderRegistry {
    openai: OpenAiAdapter,
    deepseek: DeepSeekAdapter,
    ollama: OllamaAdapter,
    gemini: GeminiAdapter,
    pub mock: MockAdapter,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            openai: OpenAiAdapter::new(),
            deepseek: DeepSeekAdapter::new(),
            ollama: OllamaAdapter::new(),
            gemini: GeminiAdapter::new(),
            mock: MockAdapter::new(),
        }
    }

    /// Resolve the adapter for a provider variant.
    pub fn get(&self, kind: ProviderKind) -> &dyn LlmAdapter {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::DeepSeek => &self.deepseek,
            ProviderKind::Ollama => &self.ollama,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Mock => &self.mock,
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
