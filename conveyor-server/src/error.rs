//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use conveyor_auth::{AuthError, TokenError};
use conveyor_core::ConveyorError;
use serde_json::json;
use tracing::error;

/// Error returned by extractors and handlers
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(AuthError::BadRequest(msg.into()))
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self(AuthError::Unauthenticated(msg.into()))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self(AuthError::Forbidden(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(AuthError::NotFound(msg.into()))
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self(err.into())
    }
}

impl From<ConveyorError> for ApiError {
    fn from(err: ConveyorError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let AuthError::Upstream(detail) = &self.0 {
            error!("Request failed: {}", detail);
        }

        (
            self.status(),
            Json(json!({ "error": self.0.client_message() })),
        )
            .into_response()
    }
}
