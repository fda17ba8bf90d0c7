//! Conveyor Auth - tokens and permission guards
//!
//! - [`TokenManager`] mints and verifies the platform's signed tokens
//! - [`PermissionEngine`] decides whether verified [`Claims`] may act on a
//!   repo, build, worker endpoint or secret scope
//!
//! Nothing here knows about HTTP; the server maps [`AuthError`] onto
//! responses.

pub mod claims;
pub mod error;
pub mod permissions;
pub mod secrets;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use claims::{BuildScope, Claims, TokenKind};
pub use error::{AuthError, AuthResult, TokenError};
pub use permissions::{EngineConfig, PermissionEngine};
pub use secrets::{Operation, SecretScope};
pub use token::{Actor, IssuedToken, MintTokenOpts, TokenManager};
