//! HTTP request handlers
//!
//! Every handler receives its guard extractor already satisfied; the bodies
//! only do the domain work.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use conveyor_auth::{Claims, IssuedToken, MintTokenOpts, SecretScope, TokenKind};
use conveyor_core::{try_with_timeout, BuildStatus, Secret, SecretType, Storage, User};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{
    BuildAccess, BuildReader, BuildWorker, PlatformAdmin, RepoAdmin, RepoReader, RepoWriter,
    SecretAdmin, WorkerAccess, WorkerRegistration,
};
use crate::error::ApiError;
use crate::memory_store::{NewSecret, RepoUpdate};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            expires_at: issued.expires_at,
        }
    }
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Exchange a refresh token for a new access token
pub async fn refresh_access_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let claims = state.tokens.parse(&request.refresh_token)?;
    if claims.kind() != TokenKind::UserRefresh {
        return Err(ApiError::unauthenticated("invalid refresh token"));
    }

    let user = match state.store.get_user(claims.subject()).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => {
            return Err(ApiError::unauthenticated("invalid refresh token"))
        }
        Err(e) => return Err(e.into()),
    };
    if !user.active {
        warn!(subject = %user.name, "Refresh attempted by inactive user");
        return Err(ApiError::unauthenticated("user is not active"));
    }

    // the admin flag comes from the stored user, not the old token
    let issued = state.tokens.issue(&MintTokenOpts::user_access(&user))?;
    info!(subject = %user.name, "Refreshed access token");
    Ok(Json(issued.into()))
}

/// Mint a registration token for a worker hostname
pub async fn mint_registration_token(
    PlatformAdmin(claims): PlatformAdmin,
    State(state): State<AppState>,
    Path(worker): Path<String>,
) -> Result<Json<TokenResponse>, ApiError> {
    let issued = state.tokens.issue(&MintTokenOpts::worker_register(&worker))?;
    info!(subject = claims.subject(), worker = %worker, "Issued worker registration token");
    Ok(Json(issued.into()))
}

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerRequest {
    pub hostname: String,
}

/// Workers only act on their own hostname; the server worker and platform
/// admins act on any
fn ensure_worker_subject(claims: &Claims, hostname: &str) -> Result<(), ApiError> {
    let privileged = claims.kind() == TokenKind::ServerWorker
        || (claims.kind() == TokenKind::UserAccess && claims.is_platform_admin());
    if privileged || claims.subject() == hostname {
        return Ok(());
    }

    warn!(
        subject = claims.subject(),
        kind = %claims.kind(),
        worker = %hostname,
        "Worker token presented for a different hostname"
    );
    Err(ApiError::forbidden(format!(
        "token is not valid for worker {}",
        hostname
    )))
}

pub async fn register_worker(
    WorkerRegistration(claims): WorkerRegistration,
    State(state): State<AppState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.hostname.trim().is_empty() {
        return Err(ApiError::bad_request("hostname must not be empty"));
    }
    ensure_worker_subject(&claims, &request.hostname)?;

    let worker = state.store.register_worker(&request.hostname).await;
    let issued = state.tokens.issue(&MintTokenOpts::worker_auth(&worker.hostname))?;
    info!(worker = %worker.hostname, kind = %claims.kind(), "Registered worker");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "worker": worker,
            "token": issued.token,
            "expires_at": issued.expires_at,
        })),
    ))
}

pub async fn refresh_worker_token(
    WorkerAccess(claims): WorkerAccess,
    State(state): State<AppState>,
    Path(worker): Path<String>,
) -> Result<Json<TokenResponse>, ApiError> {
    ensure_worker_subject(&claims, &worker)?;

    let record = state.store.get_worker(&worker).await?;
    if !record.active {
        return Err(ApiError::forbidden(format!("worker {} is not active", worker)));
    }

    let issued = state.tokens.issue(&MintTokenOpts::worker_auth(&worker))?;
    Ok(Json(issued.into()))
}

pub async fn get_repo(reader: RepoReader) -> impl IntoResponse {
    Json(reader.repo)
}

pub async fn update_repo(
    admin: RepoAdmin,
    State(state): State<AppState>,
    Json(update): Json<RepoUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.store.update_repo(admin.repo.id, update).await?;
    info!(subject = admin.claims.subject(), repo = %repo.full_name(), "Updated repo");
    Ok(Json(repo))
}

pub async fn create_build(
    writer: RepoWriter,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = writer.repo;
    if !repo.active {
        return Err(ApiError::bad_request(format!(
            "repo {} is not active",
            repo.full_name()
        )));
    }

    let build = state.store.create_build(&repo).await;
    info!(
        subject = writer.claims.subject(),
        repo = %repo.full_name(),
        build = build.id,
        "Created build"
    );
    Ok((StatusCode::CREATED, Json(build)))
}

pub async fn get_build(reader: BuildReader) -> impl IntoResponse {
    Json(reader.build)
}

#[derive(Debug, Deserialize)]
pub struct UpdateBuildRequest {
    pub status: BuildStatus,
}

pub async fn update_build(
    access: BuildAccess,
    State(state): State<AppState>,
    Json(request): Json<UpdateBuildRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let host = match access.claims.kind() {
        TokenKind::WorkerBuildToken => Some(access.claims.subject().to_string()),
        _ => None,
    };
    let build = state
        .store
        .update_build(access.build.id, request.status, host)
        .await?;
    info!(
        repo = %access.repo.full_name(),
        build = build.id,
        status = ?build.status,
        "Updated build"
    );
    Ok(Json(build))
}

/// Build token for a worker about to execute a build
pub async fn build_token(
    worker: BuildWorker,
    State(state): State<AppState>,
) -> Result<Json<TokenResponse>, ApiError> {
    let BuildWorker { claims, repo, build } = worker;

    if !build.status.is_active() {
        return Err(ApiError::bad_request(format!(
            "build {} is not pending or running",
            build.number
        )));
    }

    if claims.kind() == TokenKind::WorkerAuth {
        if let Some(host) = build.host.as_deref() {
            if host != claims.subject() {
                warn!(
                    subject = claims.subject(),
                    host = %host,
                    build = build.id,
                    "Worker requested a token for a build claimed by another host"
                );
                return Err(ApiError::forbidden(format!(
                    "build {} is not assigned to {}",
                    build.number,
                    claims.subject()
                )));
            }
        }
    }

    let hostname = build.host.clone().unwrap_or_else(|| claims.subject().to_string());
    let issued = state
        .tokens
        .issue(&MintTokenOpts::worker_build(&hostname, &build, &repo))?;
    info!(repo = %repo.full_name(), build = build.id, worker = %hostname, "Issued build token");
    Ok(Json(issued.into()))
}

/// Token the build later presents to request an identity token
pub async fn id_request_token(
    access: BuildAccess,
    State(state): State<AppState>,
) -> Result<Json<TokenResponse>, ApiError> {
    let BuildAccess { claims, repo, build } = access;

    if build.status != BuildStatus::Running {
        return Err(ApiError::bad_request(format!(
            "build {} is not running",
            build.number
        )));
    }

    let issued = state
        .tokens
        .issue(&MintTokenOpts::id_request(claims.subject(), &build, &repo))?;
    Ok(Json(issued.into()))
}

pub async fn get_settings(
    PlatformAdmin(_): PlatformAdmin,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get_settings().await?))
}

pub async fn list_secrets(
    admin: SecretAdmin,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let scope = admin.scope;
    Json(
        state
            .store
            .list_secrets(&scope.engine, scope.secret_type, &scope.org, &scope.name)
            .await,
    )
}

/// Secret metadata, plus the value when a build is reading it
#[derive(Debug, Serialize)]
pub struct SecretResponse {
    #[serde(flatten)]
    pub secret: Secret,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl SecretResponse {
    fn for_caller(claims: &Claims, secret: Secret) -> Self {
        let value = match claims.kind() {
            TokenKind::WorkerBuildToken => Some(secret.value.clone()),
            _ => None,
        };
        Self { secret, value }
    }
}

pub async fn get_secret(admin: SecretAdmin) -> Result<Json<SecretResponse>, ApiError> {
    let SecretAdmin { claims, secret, .. } = admin;
    let secret = secret.ok_or_else(|| ApiError::not_found("unable to find secret"))?;
    Ok(Json(SecretResponse::for_caller(&claims, secret)))
}

#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    pub value: String,
}

/// SCM identifiers of the entity a new secret is scoped to, as the SCM
/// reports them now
async fn capture_scm_ids(
    state: &AppState,
    user: &User,
    scope: &SecretScope,
) -> Result<(Option<String>, Option<String>, Option<String>), ApiError> {
    let timeout_ms = state.config.scm.timeout_ms;

    match scope.secret_type {
        SecretType::Org => {
            let (_, org_id) = try_with_timeout(
                state.scm.get_org_identifiers(user, &scope.org),
                timeout_ms,
                "get_org_identifiers",
            )
            .await?;
            Ok((Some(org_id), None, None))
        }
        SecretType::Repo => {
            let repo = try_with_timeout(
                state.scm.get_repo(user, &scope.org, &scope.name),
                timeout_ms,
                "get_repo",
            )
            .await?;
            Ok((Some(repo.org_id), Some(repo.id), None))
        }
        SecretType::Team | SecretType::Shared => {
            let (_, org_id) = try_with_timeout(
                state.scm.get_org_identifiers(user, &scope.org),
                timeout_ms,
                "get_org_identifiers",
            )
            .await?;
            let teams = try_with_timeout(
                state.scm.list_users_teams_for_org(user, &scope.org),
                timeout_ms,
                "list_users_teams_for_org",
            )
            .await?;
            let team = teams
                .into_iter()
                .find(|team| team.matches(&scope.name))
                .ok_or_else(|| {
                    ApiError::bad_request(format!("unable to find team {}", scope.name))
                })?;
            Ok((Some(org_id), None, Some(team.id)))
        }
    }
}

pub async fn create_secret(
    admin: SecretAdmin,
    State(state): State<AppState>,
    Json(request): Json<CreateSecretRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let SecretAdmin { claims, scope, .. } = admin;

    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("secret name must not be empty"));
    }
    if scope.secret_type == SecretType::Org && scope.name != "*" {
        return Err(ApiError::bad_request("org secrets must use '*' as the name"));
    }
    if scope.secret_type != SecretType::Org && scope.name == "*" {
        return Err(ApiError::bad_request(format!(
            "{} secrets must name a {}",
            scope.secret_type,
            if scope.secret_type == SecretType::Repo { "repo" } else { "team" }
        )));
    }

    let user = state.store.get_user(claims.subject()).await?;
    let (org_scm_id, repo_scm_id, team_scm_id) = capture_scm_ids(&state, &user, &scope).await?;

    let secret = state
        .store
        .create_secret(NewSecret {
            engine: scope.engine.clone(),
            secret_type: scope.secret_type,
            org: scope.org.clone(),
            repo: scope.name.clone(),
            name: request.name,
            value: request.value,
            org_scm_id,
            repo_scm_id,
            team_scm_id,
            created_by: user.name.clone(),
        })
        .await?;

    info!(subject = %user.name, scope = %scope, secret = %secret.name, "Created secret");
    Ok((StatusCode::CREATED, Json(secret)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSecretRequest {
    pub value: String,
}

pub async fn update_secret(
    admin: SecretAdmin,
    State(state): State<AppState>,
    Json(request): Json<UpdateSecretRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let secret = admin
        .secret
        .ok_or_else(|| ApiError::not_found("unable to find secret"))?;
    let updated = state.store.update_secret_value(secret.id, request.value).await?;
    info!(
        subject = admin.claims.subject(),
        scope = %admin.scope,
        secret = %updated.name,
        "Updated secret"
    );
    Ok(Json(updated))
}
