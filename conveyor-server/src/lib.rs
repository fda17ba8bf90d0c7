//! Conveyor API Server
//!
//! Request flow: claims establishment, then the resource establishers a
//! route needs, then exactly one permission guard, then the handler.

pub mod auth;
pub mod error;
pub mod establish;
pub mod handlers;
pub mod memory_store;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use error::ApiError;
pub use memory_store::{MemoryStore, Seed};
pub use server::{ConveyorServer, ConveyorServerBuilder};
pub use state::AppState;

use axum::{routing::get, Router};
use conveyor_core::ConveyorError;
use tower_http::trace::TraceLayer;

/// Create the main application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error types for the server
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConveyorError),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;
