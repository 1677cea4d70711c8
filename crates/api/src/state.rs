use std::sync::Arc;

use tokio::sync::RwLock;

use worldline_core::crypto::SecretCipher;
use worldline_events::SessionEventBus;
use worldline_providers::ProviderRegistry;

use crate::config::{AppConfig, RuntimeSettings};
use crate::memory::MemoryService;
use crate::runner::RunnerManager;

/// Dependencies shared by services, the runner, and websocket loops.
///
/// Cheaply cloneable; everything heavy lives behind `Arc` or is a pool.
#[derive(Clone)]
pub struct SimContext {
    /// Database connection pool.
    pub pool: worldline_db::DbPool,
    /// Immutable startup configuration.
    pub config: Arc<AppConfig>,
    /// Runtime-tunable settings (debug endpoints mutate these).
    pub runtime: Arc<RwLock<RuntimeSettings>>,
    /// Per-session event fan-out.
    pub event_bus: Arc<SessionEventBus>,
    /// Provider adapter registry.
    pub providers: Arc<ProviderRegistry>,
    /// Cipher for provider API keys, derived from `APP_SECRET_KEY`.
    pub cipher: Arc<SecretCipher>,
    /// Memory collaborator (noop when MEMORY_MODE=off).
    pub memory: Arc<dyn MemoryService>,
}

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub sim: SimContext,
    /// Per-session runner task manager.
    pub runner: Arc<RunnerManager>,
}

impl AppState {
    /// Wire up the full state graph over an existing pool.
    ///
    /// Fails only when the cipher cannot be derived (empty secret).
    pub fn build(
        config: AppConfig,
        pool: worldline_db::DbPool,
    ) -> Result<Self, worldline_core::error::CoreError> {
        let cipher = SecretCipher::new(&config.app_secret_key)?;
        let runtime = Arc::new(RwLock::new(RuntimeSettings::from_config(&config)));
        let memory = crate::memory::create_memory_service(pool.clone(), &config, Arc::clone(&runtime));
        let sim = SimContext {
            pool,
            config: Arc::new(config),
            runtime,
            event_bus: Arc::new(SessionEventBus::new()),
            providers: Arc::new(ProviderRegistry::new()),
            cipher: Arc::new(cipher),
            memory,
        };
        let runner = Arc::new(RunnerManager::new(sim.clone()));
        Ok(Self { sim, runner })
    }
}
