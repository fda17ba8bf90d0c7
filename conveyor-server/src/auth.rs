//! Guard extractors
//!
//! Each extractor names the resources its guard needs in its own type, so a
//! handler cannot run a guard without establishing those resources first.

use axum::{extract::FromRequestParts, http::request::Parts};
use conveyor_auth::{Claims, SecretScope};
use conveyor_core::{Build, Repo, Secret};

use crate::error::ApiError;
use crate::establish::{EstablishedBuild, EstablishedRepo, EstablishedSecret};
use crate::middleware::Authenticated;
use crate::AppState;

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Authenticated>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("missing or invalid bearer token"))
    }
}

async fn claims(parts: &mut Parts, state: &AppState) -> Result<Claims, ApiError> {
    let Authenticated(claims) = Authenticated::from_request_parts(parts, state).await?;
    Ok(claims)
}

/// Platform administrator
pub struct PlatformAdmin(pub Claims);

impl FromRequestParts<AppState> for PlatformAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        state.engine.must_platform_admin(&claims)?;
        Ok(Self(claims))
    }
}

/// Worker holding a registration token, or the server worker
pub struct WorkerRegistration(pub Claims);

impl FromRequestParts<AppState> for WorkerRegistration {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        state.engine.must_worker_register_token(&claims)?;
        Ok(Self(claims))
    }
}

/// Worker check-in; registration tokens are accepted
pub struct WorkerAccess(pub Claims);

impl FromRequestParts<AppState> for WorkerAccess {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        state.engine.must_worker_auth_token(&claims)?;
        Ok(Self(claims))
    }
}

/// Authenticated worker asking for a build's token
pub struct BuildWorker {
    pub claims: Claims,
    pub repo: Repo,
    pub build: Build,
}

impl FromRequestParts<AppState> for BuildWorker {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        state.engine.must_worker_auth_token_strict(&claims)?;
        let EstablishedBuild { repo, build } =
            EstablishedBuild::from_request_parts(parts, state).await?;
        Ok(Self { claims, repo, build })
    }
}

/// Holder of the build token for the addressed build
pub struct BuildAccess {
    pub claims: Claims,
    pub repo: Repo,
    pub build: Build,
}

impl FromRequestParts<AppState> for BuildAccess {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        let EstablishedBuild { repo, build } =
            EstablishedBuild::from_request_parts(parts, state).await?;
        state.engine.must_build_access(&claims, &build)?;
        Ok(Self { claims, repo, build })
    }
}

pub struct RepoAdmin {
    pub claims: Claims,
    pub repo: Repo,
}

impl FromRequestParts<AppState> for RepoAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        let EstablishedRepo(repo) = EstablishedRepo::from_request_parts(parts, state).await?;
        state.engine.must_admin(&claims, &repo).await?;
        Ok(Self { claims, repo })
    }
}

pub struct RepoWriter {
    pub claims: Claims,
    pub repo: Repo,
}

impl FromRequestParts<AppState> for RepoWriter {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        let EstablishedRepo(repo) = EstablishedRepo::from_request_parts(parts, state).await?;
        state.engine.must_write(&claims, &repo).await?;
        Ok(Self { claims, repo })
    }
}

pub struct RepoReader {
    pub claims: Claims,
    pub repo: Repo,
}

impl FromRequestParts<AppState> for RepoReader {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        let EstablishedRepo(repo) = EstablishedRepo::from_request_parts(parts, state).await?;
        state.engine.must_read(&claims, &repo, None).await?;
        Ok(Self { claims, repo })
    }
}

/// Read access to a repo with one of its builds established
pub struct BuildReader {
    pub claims: Claims,
    pub repo: Repo,
    pub build: Build,
}

impl FromRequestParts<AppState> for BuildReader {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        let EstablishedBuild { repo, build } =
            EstablishedBuild::from_request_parts(parts, state).await?;
        state.engine.must_read(&claims, &repo, Some(&build)).await?;
        Ok(Self { claims, repo, build })
    }
}

/// Secret administration at the addressed scope
pub struct SecretAdmin {
    pub claims: Claims,
    pub scope: SecretScope,
    pub secret: Option<Secret>,
}

impl FromRequestParts<AppState> for SecretAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state).await?;
        let EstablishedSecret { scope, secret } =
            EstablishedSecret::from_request_parts(parts, state).await?;
        state
            .engine
            .must_secret_admin(&claims, &scope, secret.as_ref())
            .await?;
        Ok(Self {
            claims,
            scope,
            secret,
        })
    }
}
