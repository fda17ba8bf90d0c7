//! Conveyor API server
//!
//! Main server implementation using Axum.

use crate::{create_app, AppState, MemoryStore, ServerError, ServerResult};
use axum::serve;
use conveyor_core::ConveyorConfig;
use conveyor_scm::{GitHubScmClient, ScmClient};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Main Conveyor API server
pub struct ConveyorServer {
    config: ConveyorConfig,
    state: AppState,
}

impl ConveyorServer {
    /// Create a server backed by an empty store and the configured SCM
    pub fn new(config: ConveyorConfig) -> ServerResult<Self> {
        ConveyorServerBuilder::new(config).build()
    }

    /// Start the server
    pub async fn start(self) -> ServerResult<()> {
        let address = self.config.server.address();

        info!("Starting Conveyor API server");

        let app = create_app(self.state.clone());

        let listener = TcpListener::bind(&address)
            .await
            .map_err(ServerError::Server)?;

        info!("Server listening on http://{}", address);

        if let Err(e) = serve(listener, app).await {
            error!("Server error: {}", e);
            return Err(ServerError::Server(e));
        }

        Ok(())
    }

    /// Get server configuration
    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    /// Get application state
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// Builder for ConveyorServer
pub struct ConveyorServerBuilder {
    config: ConveyorConfig,
    store: Option<Arc<MemoryStore>>,
    scm: Option<Arc<dyn ScmClient>>,
}

impl ConveyorServerBuilder {
    pub fn new(config: ConveyorConfig) -> Self {
        Self {
            config,
            store: None,
            scm: None,
        }
    }

    /// Set the server host
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.server.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Use a pre-populated store
    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific SCM client instead of the GitHub client
    pub fn scm(mut self, scm: Arc<dyn ScmClient>) -> Self {
        self.scm = Some(scm);
        self
    }

    /// Validate the configuration and build the server
    pub fn build(self) -> ServerResult<ConveyorServer> {
        self.config.validate()?;

        let scm: Arc<dyn ScmClient> = match self.scm {
            Some(scm) => scm,
            None => Arc::new(GitHubScmClient::new(self.config.scm.clone())?),
        };
        let store = self.store.unwrap_or_default();
        let state = AppState::new(self.config.clone(), store, scm);

        Ok(ConveyorServer {
            config: self.config,
            state,
        })
    }
}
