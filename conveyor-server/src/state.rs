//! Application state shared by every request

use conveyor_auth::{EngineConfig, PermissionEngine, TokenManager};
use conveyor_core::{ConveyorConfig, Storage};
use conveyor_scm::ScmClient;
use std::sync::Arc;
use tracing::info;

use crate::memory_store::MemoryStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConveyorConfig>,
    pub tokens: Arc<TokenManager>,
    pub engine: Arc<PermissionEngine>,
    pub store: Arc<MemoryStore>,
    /// Used by handlers that capture SCM identifiers; guards reach the SCM
    /// through the engine
    pub scm: Arc<dyn ScmClient>,
}

impl AppState {
    pub fn new(config: ConveyorConfig, store: Arc<MemoryStore>, scm: Arc<dyn ScmClient>) -> Self {
        let tokens = Arc::new(TokenManager::new(&config.auth));
        let storage: Arc<dyn Storage> = store.clone();
        let engine = Arc::new(PermissionEngine::new(
            storage,
            scm.clone(),
            EngineConfig::from_config(&config),
        ));

        info!(
            scm = %config.scm.base_url,
            scm_timeout_ms = config.scm.timeout_ms,
            server_secret = config.auth.server_secret.is_some(),
            "Initialized application state"
        );

        Self {
            config: Arc::new(config),
            tokens,
            engine,
            store,
            scm,
        }
    }
}
