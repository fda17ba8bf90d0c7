//! Route definitions

use crate::{handlers, middleware::establish_claims, AppState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

/// Routes that require a verified bearer token
pub fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Admin
        .route("/admin/settings", get(handlers::get_settings))
        .route(
            "/admin/workers/{worker}/register-token",
            post(handlers::mint_registration_token),
        )
        // Workers
        .route("/workers", post(handlers::register_worker))
        .route(
            "/workers/{worker}/refresh",
            post(handlers::refresh_worker_token),
        )
        // Repos and builds
        .route(
            "/repos/{org}/{repo}",
            get(handlers::get_repo).patch(handlers::update_repo),
        )
        .route("/repos/{org}/{repo}/builds", post(handlers::create_build))
        .route(
            "/repos/{org}/{repo}/builds/{build}",
            get(handlers::get_build).put(handlers::update_build),
        )
        .route(
            "/repos/{org}/{repo}/builds/{build}/token",
            get(handlers::build_token),
        )
        .route(
            "/repos/{org}/{repo}/builds/{build}/id_request_token",
            get(handlers::id_request_token),
        )
        // Secrets
        .route(
            "/secrets/{engine}/{type}/{org}/{name}",
            get(handlers::list_secrets).post(handlers::create_secret),
        )
        .route(
            "/secrets/{engine}/{type}/{org}/{name}/{secret}",
            get(handlers::get_secret).put(handlers::update_secret),
        )
        .route_layer(middleware::from_fn_with_state(state, establish_claims))
}

/// Routes reachable without a bearer token
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/auth/refresh", post(handlers::refresh_access_token))
}

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new().nest(
        "/api/v1",
        protected_routes(state).merge(public_routes()),
    )
}
