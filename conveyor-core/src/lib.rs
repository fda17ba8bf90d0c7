//! Conveyor Core - domain types, storage trait, errors and configuration
//!
//! Shared by the SCM client, the auth core and the HTTP server.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use self::config::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
