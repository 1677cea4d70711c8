//! Deterministic in-process provider for tests and offline runs.
//!
//! Output is a fixed-shape report JSON seeded from a hash of the rendered
//! input messages: the same prompt always yields the same text. Tests can
//! inspect the captured prompts and arm a failure counter that makes the
//! next N `generate` calls fail with a retryable error.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use worldline_core::prompt::{PromptMessage, PromptRole};

use crate::adapter::{
    GenerateOptions, GenerateResult, LlmAdapter, ProviderError, RuntimeConfig,
};

#[derive(Default)]
struct MockState {
    /// Remaining injected failures; armed via `set_fail_times` or the
    /// config's `extra_json` `{"fail_times": N}` knob.
    fail_remaining: u32,
    extra_armed: bool,
    prompts: Vec<Vec<PromptMessage>>,
}

pub struct MockAdapter {
    state: Mutex<MockState>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Make the next `count` generate calls fail with a retryable error.
    pub fn set_fail_times(&self, count: u32) {
        let mut state = self.state.lock().expect("mock state lock");
        state.fail_remaining = count;
        state.extra_armed = true;
    }

    /// The most recent prompt handed to `generate`.
    pub fn last_prompt(&self) -> Option<Vec<PromptMessage>> {
        self.state
            .lock()
            .expect("mock state lock")
            .prompts
            .last()
            .cloned()
    }

    /// Number of `generate` calls that produced output.
    pub fn generate_calls(&self) -> usize {
        self.state.lock().expect("mock state lock").prompts.len()
    }

    /// FNV-1a over the rendered messages; the determinism seed.
    fn seed_from(messages: &[PromptMessage]) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for message in messages {
            for byte in message
                .content
                .bytes()
                .chain(format!("{:?}", message.role).bytes())
            {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
        }
        hash
    }

    /// Pull the tick label back out of the user prompt.
    fn time_advance_from(messages: &[PromptMessage]) -> String {
        for message in messages.iter().rev() {
            if message.role != PromptRole::User {
                continue;
            }
            for line in message.content.lines() {
                if let Some(rest) = line.strip_prefix("Time advance label:") {
                    let label = rest.trim();
                    if !label.is_empty() {
                        return label.to_string();
                    }
                }
            }
        }
        "tick".to_string()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for MockAdapter {
    async fn list_models(&self, cfg: &RuntimeConfig) -> Result<Vec<String>, ProviderError> {
        if cfg.model_name.is_empty() {
            Ok(vec!["mock-1".to_string(), "fixture-v1".to_string()])
        } else {
            Ok(vec![cfg.model_name.clone()])
        }
    }

    async fn generate(
        &self,
        cfg: &RuntimeConfig,
        messages: &[PromptMessage],
        _options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        {
            let mut state = self.state.lock().expect("mock state lock");
            if !state.extra_armed {
                if let Some(fail_times) = cfg
                    .extra
                    .as_ref()
                    .and_then(|extra| extra.get("fail_times"))
                    .and_then(Value::as_u64)
                {
                    state.fail_remaining = fail_times as u32;
                }
                state.extra_armed = true;
            }
            if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                return Err(ProviderError::Upstream {
                    status: 503,
                    message: "injected mock failure".into(),
                });
            }
            state.prompts.push(messages.to_vec());
        }

        let seed = Self::seed_from(messages);
        let time_advance = Self::time_advance_from(messages);
        let content = json!({
            "title": "Worldline Report",
            "time_advance": time_advance,
            "summary": format!("Deterministic report {seed:016x}."),
            "events": [
                {"category": "neutral", "severity": "low", "description": "Stability holds"},
                {"category": "neutral", "severity": "medium", "description": "Minor shifts detected"},
            ],
            "risks": [
                {"category": "negative", "severity": "medium", "description": "External shock possible"},
            ],
        })
        .to_string();

        Ok(GenerateResult {
            text: content,
            token_in: None,
            token_out: None,
            raw: Value::Null,
        })
    }
}
