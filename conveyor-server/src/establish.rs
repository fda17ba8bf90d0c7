//! Resource establishers
//!
//! Load the org, repo, build or secret a route addresses. Loaded values are
//! cached in the request extensions so guards composed from several
//! establishers fetch each resource once.

use axum::{
    extract::{FromRequestParts, Path},
    http::{request::Parts, Method},
};
use conveyor_auth::{Operation, SecretScope};
use conveyor_core::{Build, Repo, Secret, Storage};
use std::collections::HashMap;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone)]
struct PathParams(HashMap<String, String>);

impl PathParams {
    fn get(&self, name: &str) -> Result<&str, ApiError> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("no {} provided", name)))
    }

    fn optional(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

async fn path_params(parts: &mut Parts, state: &AppState) -> Result<PathParams, ApiError> {
    if let Some(params) = parts.extensions.get::<PathParams>() {
        return Ok(params.clone());
    }

    let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;
    let params = PathParams(params);
    parts.extensions.insert(params.clone());
    Ok(params)
}

/// Org named by the `{org}` path segment
#[derive(Debug, Clone)]
pub struct EstablishedOrg(pub String);

impl FromRequestParts<AppState> for EstablishedOrg {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let params = path_params(parts, state).await?;
        Ok(Self(params.get("org")?.to_string()))
    }
}

/// Repo named by `{org}/{repo}`
#[derive(Debug, Clone)]
pub struct EstablishedRepo(pub Repo);

impl FromRequestParts<AppState> for EstablishedRepo {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(repo) = parts.extensions.get::<EstablishedRepo>() {
            return Ok(repo.clone());
        }

        let EstablishedOrg(org) = EstablishedOrg::from_request_parts(parts, state).await?;
        let params = path_params(parts, state).await?;
        let name = params.get("repo")?;

        let repo = state.store.get_repo_for_org(&org, name).await?;
        debug!(org = %org, repo = %repo.name, "Established repo");

        let established = Self(repo);
        parts.extensions.insert(established.clone());
        Ok(established)
    }
}

/// Build `{build}` (a build number) of the established repo
#[derive(Debug, Clone)]
pub struct EstablishedBuild {
    pub repo: Repo,
    pub build: Build,
}

impl FromRequestParts<AppState> for EstablishedBuild {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(build) = parts.extensions.get::<EstablishedBuild>() {
            return Ok(build.clone());
        }

        let EstablishedRepo(repo) = EstablishedRepo::from_request_parts(parts, state).await?;
        let params = path_params(parts, state).await?;
        let number: i64 = params
            .get("build")?
            .parse()
            .map_err(|_| ApiError::bad_request("invalid build number"))?;

        let build = state.store.get_build_for_repo(&repo, number).await?;
        debug!(repo = %repo.full_name(), build = build.id, number, "Established build");

        let established = Self { repo, build };
        parts.extensions.insert(established.clone());
        Ok(established)
    }
}

/// Secret scope from `{engine}/{type}/{org}/{name}[/{secret}]`, plus the
/// stored secret when one is named
#[derive(Debug, Clone)]
pub struct EstablishedSecret {
    pub scope: SecretScope,
    pub secret: Option<Secret>,
}

impl FromRequestParts<AppState> for EstablishedSecret {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let EstablishedOrg(org) = EstablishedOrg::from_request_parts(parts, state).await?;
        let params = path_params(parts, state).await?;

        let operation = if parts.method == Method::GET {
            Operation::Read
        } else {
            Operation::Write
        };

        let scope = SecretScope::parse(
            params.get("engine")?,
            params.get("type")?,
            &org,
            params.get("name")?,
            params.optional("secret"),
            operation,
        )?;

        let secret = match &scope.secret {
            Some(path) => Some(
                state
                    .store
                    .get_secret(&scope.engine, scope.secret_type, &scope.org, &scope.name, path)
                    .await?,
            ),
            None => None,
        };

        debug!(scope = %scope, found = secret.is_some(), "Established secret scope");
        Ok(Self { scope, secret })
    }
}
