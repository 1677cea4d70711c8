//! Application configuration loaded from environment variables.

use serde::{Deserialize, Serialize};
use worldline_core::event_dice::{EventDiceConfig, Hemisphere};

/// Memory collaborator mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    Off,
    Vector,
    Hybrid,
}

impl MemoryMode {
    fn parse_or_off(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "vector" => MemoryMode::Vector,
            "hybrid" => MemoryMode::Hybrid,
            _ => MemoryMode::Off,
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields except `APP_SECRET_KEY` have defaults suitable for local
/// development. A missing or empty secret key is a startup failure: stored
/// provider keys would be unreadable.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_env: String,
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// SQLite database URL (default: `sqlite://worldline.db`).
    pub db_url: String,
    /// Operator secret the AEAD key is derived from. Required, non-empty.
    pub app_secret_key: String,
    pub default_post_gen_delay_sec: i64,
    pub default_tick_label: String,
    pub default_output_language: String,
    pub openai_base_url: String,
    pub ollama_base_url: String,
    pub deepseek_base_url: String,
    pub gemini_base_url: String,
    pub memory_mode: MemoryMode,
    pub memory_max_snippets: usize,
    pub memory_max_chars: usize,
    pub embed_provider: String,
    pub embed_model: String,
    pub embed_dim: usize,
    pub event_dice: EventDiceConfig,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Panics when `APP_SECRET_KEY` is unset or empty, or when a numeric
    /// variable does not parse; misconfiguration should fail fast at boot.
    pub fn from_env() -> Self {
        let app_secret_key = env_var("APP_SECRET_KEY", "");
        if app_secret_key.is_empty() {
            panic!("APP_SECRET_KEY must be set and non-empty");
        }

        let cors_origins: Vec<String> = env_var(
            "CORS_ORIGINS",
            "http://127.0.0.1:5500,http://localhost:5500",
        )
        .split(',')
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect();

        Self {
            app_env: env_var("APP_ENV", "dev"),
            host: env_var("APP_HOST", "0.0.0.0"),
            port: parse_env("APP_PORT", 8000),
            cors_origins,
            db_url: env_var("DB_URL", "sqlite://worldline.db"),
            app_secret_key,
            default_post_gen_delay_sec: parse_env("DEFAULT_POST_GEN_DELAY_SEC", 5),
            default_tick_label: env_var("DEFAULT_TICK_LABEL", "1个月"),
            default_output_language: env_var("DEFAULT_OUTPUT_LANGUAGE", "zh-cn"),
            openai_base_url: env_var("OPENAI_BASE_URL", "https://api.openai.com"),
            ollama_base_url: env_var("OLLAMA_BASE_URL", "http://localhost:11434"),
            deepseek_base_url: env_var("DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
            gemini_base_url: env_var(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            memory_mode: MemoryMode::parse_or_off(&env_var("MEMORY_MODE", "off")),
            memory_max_snippets: parse_env("MEMORY_MAX_SNIPPETS", 8),
            memory_max_chars: parse_env("MEMORY_MAX_CHARS", 4000),
            embed_provider: env_var("EMBED_PROVIDER", "deterministic"),
            embed_model: env_var("EMBED_MODEL", "deterministic-v1"),
            embed_dim: parse_env("EMBED_DIM", 64),
            event_dice: EventDiceConfig {
                enabled: parse_env("EVENT_DICE_ENABLED", true),
                good_prob: parse_env("EVENT_GOOD_EVENT_PROB", 0.25),
                bad_prob: parse_env("EVENT_BAD_EVENT_PROB", 0.15),
                rebel_prob: parse_env("EVENT_REBEL_PROB", 0.10),
                min_events: parse_env("EVENT_MIN_EVENTS", 1),
                max_events: parse_env("EVENT_MAX_EVENTS", 5),
                hemisphere: Hemisphere::parse_or_north(&env_var(
                    "EVENT_DEFAULT_HEMISPHERE",
                    "north",
                )),
            },
        }
    }

    /// Test configuration with a throwaway secret and dice disabled.
    pub fn for_tests() -> Self {
        Self {
            app_env: "test".into(),
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: vec!["http://localhost:5500".into()],
            db_url: "sqlite::memory:".into(),
            app_secret_key: "test-secret-key".into(),
            default_post_gen_delay_sec: 0,
            default_tick_label: "1 month".into(),
            default_output_language: "en".into(),
            openai_base_url: "https://api.openai.com".into(),
            ollama_base_url: "http://localhost:11434".into(),
            deepseek_base_url: "https://api.deepseek.com".into(),
            gemini_base_url: "https://generativelanguage.googleapis.com".into(),
            memory_mode: MemoryMode::Off,
            memory_max_snippets: 8,
            memory_max_chars: 4000,
            embed_provider: "deterministic".into(),
            embed_model: "deterministic-v1".into(),
            embed_dim: 16,
            event_dice: EventDiceConfig {
                enabled: false,
                ..EventDiceConfig::default()
            },
        }
    }
}

fn env_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} is invalid: {e}")),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Runtime-tunable settings
// ---------------------------------------------------------------------------

/// The non-secret subset of configuration adjustable at runtime through the
/// debug settings endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub default_post_gen_delay_sec: i64,
    pub default_tick_label: String,
    pub memory_max_snippets: usize,
    pub memory_max_chars: usize,
    pub event_dice: EventDiceConfig,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_post_gen_delay_sec: config.default_post_gen_delay_sec,
            default_tick_label: config.default_tick_label.clone(),
            memory_max_snippets: config.memory_max_snippets,
            memory_max_chars: config.memory_max_chars,
            event_dice: config.event_dice.clone(),
        }
    }
}

/// Partial update for [`RuntimeSettings`]; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSettingsPatch {
    pub default_post_gen_delay_sec: Option<i64>,
    pub default_tick_label: Option<String>,
    pub memory_max_snippets: Option<usize>,
    pub memory_max_chars: Option<usize>,
    pub event_dice: Option<EventDiceConfig>,
}

impl RuntimeSettings {
    /// Apply a patch in place.
    pub fn apply(&mut self, patch: RuntimeSettingsPatch) {
        if let Some(value) = patch.default_post_gen_delay_sec {
            self.default_post_gen_delay_sec = value.max(0);
        }
        if let Some(value) = patch.default_tick_label {
            self.default_tick_label = value;
        }
        if let Some(value) = patch.memory_max_snippets {
            self.memory_max_snippets = value;
        }
        if let Some(value) = patch.memory_max_chars {
            self.memory_max_chars = value;
        }
        if let Some(value) = patch.event_dice {
            self.event_dice = value;
        }
    }
}
