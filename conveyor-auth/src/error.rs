//! Auth error taxonomy

use conveyor_core::ConveyorError;
use thiserror::Error;
use tracing::{error, warn};

pub type AuthResult<T> = Result<T, AuthError>;

/// Token minting and verification errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token options: {0}")]
    InvalidOptions(String),
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("token creation failed")]
    Creation,
}

/// Outcome of a failed authentication or authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Missing, unparseable, expired or badly signed token
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Authenticated but lacking scope or permission
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Structurally invalid or inapplicable request
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Storage or SCM failure outside the caller's control
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl AuthError {
    /// HTTP status for this error. Unauthenticated and forbidden share 401 so
    /// callers cannot tell the two apart.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Unauthenticated(_) | AuthError::Forbidden(_) => 401,
            AuthError::BadRequest(_) => 400,
            AuthError::NotFound(_) => 404,
            AuthError::Upstream(_) => 500,
        }
    }

    /// Message safe to return to the caller
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Unauthenticated(msg)
            | AuthError::Forbidden(msg)
            | AuthError::BadRequest(msg)
            | AuthError::NotFound(msg) => msg.clone(),
            AuthError::Upstream(_) => "internal server error".to_string(),
        }
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        AuthError::Forbidden(msg.into())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidOptions(_) | TokenError::Creation => {
                error!(error = %err, "Token minting failed");
                AuthError::Upstream(err.to_string())
            }
            TokenError::InvalidSignature | TokenError::Expired | TokenError::Malformed => {
                AuthError::Unauthenticated(err.to_string())
            }
        }
    }
}

impl From<ConveyorError> for AuthError {
    fn from(err: ConveyorError) -> Self {
        if err.is_not_found() {
            warn!(error = %err, "Referenced resource not found");
            return AuthError::NotFound(match &err {
                ConveyorError::NotFound { resource, .. } => format!("unable to find {}", resource),
                _ => "resource not found".to_string(),
            });
        }

        err.log();
        match err {
            ConveyorError::Validation { message, .. } => AuthError::BadRequest(message),
            other => AuthError::Upstream(other.to_string()),
        }
    }
}
