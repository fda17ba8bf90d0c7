//! Secret scope resolution
//!
//! Decides whether a caller may read or manage secrets at a given scope.
//! Stored secrets remember the SCM identifiers of the org, repo or team they
//! were created for; those identifiers, not the names in the path, decide
//! access once a secret exists. A name that has since been reassigned to a
//! different SCM entity no longer matches.

use conveyor_core::{AccessLevel, Secret, SecretType, User};
use std::fmt;
use tracing::{debug, error, warn};

use crate::claims::{Claims, TokenKind};
use crate::error::{AuthError, AuthResult};
use crate::permissions::PermissionEngine;

/// Read or write access to a secret scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// The secret scope a request addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretScope {
    pub engine: String,
    pub secret_type: SecretType,
    pub org: String,
    /// Repo or team name, `*` for org-wide or wildcard listings
    pub name: String,
    /// Secret name, when addressing one secret
    pub secret: Option<String>,
    pub operation: Operation,
}

impl SecretScope {
    /// Build a scope from raw path segments
    pub fn parse(
        engine: &str,
        secret_type: &str,
        org: &str,
        name: &str,
        secret: Option<&str>,
        operation: Operation,
    ) -> AuthResult<Self> {
        let secret_type = secret_type
            .parse::<SecretType>()
            .map_err(AuthError::BadRequest)?;

        if org.is_empty() || name.is_empty() {
            return Err(AuthError::BadRequest(
                "secret scope requires an org and a name".to_string(),
            ));
        }

        Ok(Self {
            engine: engine.to_string(),
            secret_type,
            org: org.to_string(),
            name: name.to_string(),
            secret: secret.map(str::to_string),
            operation,
        })
    }

    fn is_wildcard(&self) -> bool {
        self.name == "*"
    }
}

impl fmt::Display for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.engine, self.secret_type, self.org, self.name
        )?;
        if let Some(secret) = &self.secret {
            write!(f, "/{}", secret)?;
        }
        Ok(())
    }
}

/// Stored identifier must be present and equal to the live one
fn scm_id_matches(stored: Option<&str>, live: &str) -> bool {
    matches!(stored, Some(stored) if !stored.is_empty() && stored == live)
}

impl PermissionEngine {
    /// Secret administration. `existing` is the stored secret the scope
    /// names, if any.
    pub async fn must_secret_admin(
        &self,
        claims: &Claims,
        scope: &SecretScope,
        existing: Option<&Secret>,
    ) -> AuthResult<()> {
        debug!(
            subject = claims.subject(),
            kind = %claims.kind(),
            scope = %scope,
            "Resolving secret access"
        );

        match claims.kind() {
            TokenKind::UserAccess if claims.is_platform_admin() => Ok(()),
            TokenKind::UserAccess => {
                let user = self.caller(claims).await?;
                self.user_secret_access(&user, scope, existing).await
            }
            TokenKind::WorkerBuildToken => self.build_secret_access(claims, scope, existing).await,
            TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::IdRequestToken
            | TokenKind::ServerWorker => Err(AuthError::forbidden(format!(
                "invalid token type {} for secret access",
                claims.kind()
            ))),
        }
    }

    /// A build token may read secrets belonging to its own repo and org.
    /// Team and shared secrets are one scope, readable by any running build.
    async fn build_secret_access(
        &self,
        claims: &Claims,
        scope: &SecretScope,
        existing: Option<&Secret>,
    ) -> AuthResult<()> {
        if scope.operation != Operation::Read {
            warn!(
                subject = claims.subject(),
                scope = %scope,
                "Build token attempted a secret write"
            );
            return Err(AuthError::forbidden("build tokens may only read secrets"));
        }

        let build_id = claims
            .build_id()
            .ok_or_else(|| AuthError::forbidden("build token carries no build"))?;

        let build = match self.storage.get_build(build_id).await {
            Ok(build) => build,
            Err(e) if e.is_not_found() => {
                warn!(build = build_id, "Build token references a missing build");
                return Err(AuthError::forbidden(format!("unable to find build {}", build_id)));
            }
            Err(e) => return Err(e.into()),
        };

        if !build.status.is_active() {
            return Err(AuthError::forbidden(format!(
                "build {} is no longer running",
                build_id
            )));
        }

        let repo = match self.storage.get_repo(build.repo_id).await {
            Ok(repo) => repo,
            Err(e) if e.is_not_found() => {
                return Err(AuthError::forbidden(format!(
                    "unable to find repo for build {}",
                    build_id
                )))
            }
            Err(e) => return Err(e.into()),
        };

        match scope.secret_type {
            SecretType::Shared | SecretType::Team => Ok(()),
            SecretType::Org => {
                let secret = existing.ok_or_else(|| {
                    AuthError::forbidden("build tokens may only read named secrets")
                })?;

                if scm_id_matches(secret.org_scm_id.as_deref(), &repo.org_scm_id) {
                    return Ok(());
                }
                warn!(
                    build = build_id,
                    repo = %repo.full_name(),
                    secret = %secret.name,
                    "Org secret does not belong to the build's org"
                );
                Err(AuthError::forbidden(format!(
                    "secret {} is not available to build {}",
                    secret.name, build_id
                )))
            }
            SecretType::Repo => {
                let secret = existing.ok_or_else(|| {
                    AuthError::forbidden("build tokens may only read named secrets")
                })?;

                let live = self
                    .scm_call(
                        "get_repo",
                        self.scm.get_repo(&repo.owner, &repo.org, &repo.name),
                    )
                    .await
                    .map_err(|e| {
                        error!(repo = %repo.full_name(), "Unable to fetch repo identifiers: {}", e);
                        AuthError::forbidden("unable to verify repo identity")
                    })?;

                if scm_id_matches(secret.repo_scm_id.as_deref(), &live.id) {
                    return Ok(());
                }
                warn!(
                    build = build_id,
                    repo = %repo.full_name(),
                    secret = %secret.name,
                    "Repo secret does not belong to the build's repo"
                );
                Err(AuthError::forbidden(format!(
                    "secret {} is not available to build {}",
                    secret.name, build_id
                )))
            }
        }
    }

    async fn user_secret_access(
        &self,
        user: &User,
        scope: &SecretScope,
        existing: Option<&Secret>,
    ) -> AuthResult<()> {
        match scope.secret_type {
            SecretType::Org => {
                let level = self
                    .scm_call("org_access", self.scm.org_access(user, &scope.org))
                    .await
                    .unwrap_or_else(|e| {
                        error!(
                            subject = %user.name,
                            org = %scope.org,
                            "Org access lookup failed, denying: {}",
                            e
                        );
                        AccessLevel::None
                    });

                if !level.satisfies(AccessLevel::Admin) {
                    return Err(AuthError::forbidden(format!(
                        "user {} does not have 'admin' permissions for the org {}",
                        user.name, scope.org
                    )));
                }

                if let Some(secret) = existing {
                    self.verify_org_identity(user, &scope.org, secret).await?;
                }
                Ok(())
            }
            SecretType::Repo => {
                let level = self
                    .scm_call(
                        "repo_access",
                        self.scm
                            .repo_access(&user.name, &user.token, &scope.org, &scope.name),
                    )
                    .await
                    .unwrap_or_else(|e| {
                        error!(
                            subject = %user.name,
                            org = %scope.org,
                            repo = %scope.name,
                            "Repo access lookup failed, denying: {}",
                            e
                        );
                        AccessLevel::None
                    });

                if !level.satisfies(AccessLevel::Admin) {
                    return Err(AuthError::forbidden(format!(
                        "user {} does not have 'admin' permissions for the repo {}/{}",
                        user.name, scope.org, scope.name
                    )));
                }

                if let Some(secret) = existing {
                    let live = self
                        .scm_call(
                            "get_repo",
                            self.scm.get_repo(user, &scope.org, &scope.name),
                        )
                        .await
                        .map_err(|e| {
                            error!(subject = %user.name, "Unable to fetch repo identifiers: {}", e);
                            AuthError::forbidden("unable to verify repo identity")
                        })?;

                    if !scm_id_matches(secret.repo_scm_id.as_deref(), &live.id) {
                        warn!(
                            subject = %user.name,
                            secret = %secret.name,
                            stored = ?secret.repo_scm_id,
                            live = %live.id,
                            "Repo identity changed since the secret was created"
                        );
                        return Err(AuthError::forbidden(format!(
                            "repo {}/{} no longer matches the secret's repo",
                            scope.org, scope.name
                        )));
                    }
                }
                Ok(())
            }
            SecretType::Team | SecretType::Shared => {
                if scope.operation == Operation::Read && scope.is_wildcard() {
                    if scope.org.eq_ignore_ascii_case(&user.name) {
                        return Ok(());
                    }

                    match self
                        .scm_call(
                            "list_users_teams_for_org",
                            self.scm.list_users_teams_for_org(user, &scope.org),
                        )
                        .await
                    {
                        Ok(teams) if !teams.is_empty() => return Ok(()),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                subject = %user.name,
                                org = %scope.org,
                                "Team listing failed: {}",
                                e
                            )
                        }
                    }
                }

                self.require_team_admin(user, scope, existing).await
            }
        }
    }

    /// Maintainer of the team the scope names, addressed by SCM identifier
    async fn require_team_admin(
        &self,
        user: &User,
        scope: &SecretScope,
        existing: Option<&Secret>,
    ) -> AuthResult<()> {
        let (org_id, team_id) = match existing {
            Some(secret) => {
                let org_id = self.verify_org_identity(user, &scope.org, secret).await?;
                let team_id = secret
                    .team_scm_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| AuthError::forbidden("secret has no team identifier"))?;
                (org_id, team_id)
            }
            None => {
                let org_id = self.live_org_id(user, &scope.org).await?;
                let teams = self
                    .scm_call(
                        "list_users_teams_for_org",
                        self.scm.list_users_teams_for_org(user, &scope.org),
                    )
                    .await
                    .map_err(|e| {
                        error!(
                            subject = %user.name,
                            org = %scope.org,
                            "Team listing failed, denying: {}",
                            e
                        );
                        AuthError::forbidden("unable to verify team membership")
                    })?;
                let team = teams
                    .into_iter()
                    .find(|team| team.matches(&scope.name))
                    .ok_or_else(|| {
                        AuthError::forbidden(format!(
                            "user {} is not a member of team {}",
                            user.name, scope.name
                        ))
                    })?;
                (org_id, team.id)
            }
        };

        let level = self
            .scm_call(
                "team_access",
                self.scm
                    .team_access(user, &scope.org, &scope.name, &org_id, &team_id),
            )
            .await
            .unwrap_or_else(|e| {
                error!(
                    subject = %user.name,
                    team = %scope.name,
                    "Team access lookup failed, denying: {}",
                    e
                );
                AccessLevel::None
            });

        if level.satisfies(AccessLevel::Admin) {
            return Ok(());
        }

        Err(AuthError::forbidden(format!(
            "user {} does not have 'admin' permissions for the team {}",
            user.name, scope.name
        )))
    }

    async fn live_org_id(&self, user: &User, org: &str) -> AuthResult<String> {
        self.scm_call("get_org_identifiers", self.scm.get_org_identifiers(user, org))
            .await
            .map(|(_, id)| id)
            .map_err(|e| {
                error!(subject = %user.name, org = %org, "Unable to fetch org identifiers: {}", e);
                AuthError::forbidden("unable to verify org identity")
            })
    }

    /// The org's live identifier, provided it matches the one stored with
    /// the secret
    async fn verify_org_identity(
        &self,
        user: &User,
        org: &str,
        secret: &Secret,
    ) -> AuthResult<String> {
        let live = self.live_org_id(user, org).await?;

        if scm_id_matches(secret.org_scm_id.as_deref(), &live) {
            return Ok(live);
        }

        warn!(
            subject = %user.name,
            org = %org,
            secret = %secret.name,
            stored = ?secret.org_scm_id,
            live = %live,
            "Org identity changed since the secret was created"
        );
        Err(AuthError::forbidden(format!(
            "org {} no longer matches the secret's org",
            org
        )))
    }
}
