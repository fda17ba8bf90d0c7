//! Claims establishment
//!
//! Runs once per protected request, before any establisher or guard: reads
//! the bearer token, verifies it and stores the claims in the request
//! extensions.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use conveyor_auth::{Claims, TokenKind};
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Verified claims of the current request
#[derive(Debug, Clone)]
pub struct Authenticated(pub Claims);

/// Value of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub async fn establish_claims(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthenticated("missing or invalid bearer token"))?;

    let claims = state.tokens.parse(token).map_err(|e| {
        debug!(path = %request.uri().path(), "Rejected bearer token: {}", e);
        ApiError::from(e)
    })?;

    // refresh tokens are only good for minting a new access token
    if claims.kind() == TokenKind::UserRefresh {
        return Err(ApiError::unauthenticated(
            "refresh tokens cannot be used as bearer credentials",
        ));
    }

    debug!(
        subject = claims.subject(),
        kind = %claims.kind(),
        build = ?claims.build_id(),
        "Established claims"
    );

    request.extensions_mut().insert(Authenticated(claims));
    Ok(next.run(request).await)
}
