//! Permission guards
//!
//! Each guard inspects verified [`Claims`] together with the resources the
//! request addresses and either lets the request through or explains why it
//! is denied. Guards that need the caller's SCM permission consult the SCM
//! live, under a deadline. Every SCM failure on a permission lookup is
//! treated as "no access".

use conveyor_core::{
    try_with_timeout, AccessLevel, Build, BuildStatus, ConveyorConfig, ConveyorResult, Repo,
    Storage, User,
};
use conveyor_scm::ScmClient;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::claims::{Claims, TokenKind};
use crate::error::{AuthError, AuthResult};

/// Engine settings taken from the platform configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The only subject server-worker claims are accepted for
    pub server_worker_subject: String,
    /// Deadline for each SCM call
    pub scm_timeout_ms: u64,
}

impl EngineConfig {
    pub fn from_config(config: &ConveyorConfig) -> Self {
        Self {
            server_worker_subject: config.auth.server_worker_subject.clone(),
            scm_timeout_ms: config.scm.timeout_ms,
        }
    }
}

/// Evaluates authorization decisions against storage and the SCM
pub struct PermissionEngine {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) scm: Arc<dyn ScmClient>,
    config: EngineConfig,
}

impl PermissionEngine {
    pub fn new(storage: Arc<dyn Storage>, scm: Arc<dyn ScmClient>, config: EngineConfig) -> Self {
        Self {
            storage,
            scm,
            config,
        }
    }

    /// Run an SCM call under the configured deadline
    pub(crate) async fn scm_call<T, F>(&self, operation: &str, call: F) -> ConveyorResult<T>
    where
        F: Future<Output = ConveyorResult<T>>,
    {
        try_with_timeout(call, self.config.scm_timeout_ms, operation).await
    }

    fn is_server_worker(&self, claims: &Claims) -> bool {
        claims.kind() == TokenKind::ServerWorker
            && claims.subject() == self.config.server_worker_subject
    }

    /// Load the calling user named by a user token's subject
    pub(crate) async fn caller(&self, claims: &Claims) -> AuthResult<User> {
        let user = match self.storage.get_user(claims.subject()).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                warn!(subject = claims.subject(), "Token subject has no user record");
                return Err(AuthError::forbidden("unable to find the calling user"));
            }
            Err(e) => return Err(e.into()),
        };

        if !user.active {
            warn!(subject = claims.subject(), "Inactive user presented a token");
            return Err(AuthError::forbidden(format!("user {} is not active", user.name)));
        }

        Ok(user)
    }

    /// Platform administrators only, and only via a user access token
    pub fn must_platform_admin(&self, claims: &Claims) -> AuthResult<()> {
        match claims.kind() {
            TokenKind::UserAccess if claims.is_platform_admin() => return Ok(()),
            TokenKind::WorkerBuildToken | TokenKind::IdRequestToken => {
                warn!(
                    subject = claims.subject(),
                    kind = %claims.kind(),
                    build = ?claims.build_id(),
                    "Build-scoped token attempted a platform admin action"
                );
            }
            TokenKind::UserAccess
            | TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::ServerWorker => {}
        }

        Err(AuthError::forbidden(format!(
            "{} is not a platform admin",
            claims.subject()
        )))
    }

    /// Worker registration: a registration token or the platform's own worker
    pub fn must_worker_register_token(&self, claims: &Claims) -> AuthResult<()> {
        match claims.kind() {
            TokenKind::WorkerRegister => Ok(()),
            TokenKind::ServerWorker if self.is_server_worker(claims) => Ok(()),
            TokenKind::ServerWorker
            | TokenKind::UserAccess
            | TokenKind::UserRefresh
            | TokenKind::WorkerAuth
            | TokenKind::WorkerBuildToken
            | TokenKind::IdRequestToken => Err(AuthError::forbidden(format!(
                "invalid token type {} for worker registration",
                claims.kind()
            ))),
        }
    }

    /// Worker check-in and token refresh. Registration tokens are accepted
    /// so a newly registered worker can make its first check-in.
    pub fn must_worker_auth_token(&self, claims: &Claims) -> AuthResult<()> {
        match claims.kind() {
            TokenKind::WorkerRegister => Ok(()),
            _ => self.must_worker_auth_token_strict(claims),
        }
    }

    /// Worker endpoints that must not be reachable with a registration token
    pub fn must_worker_auth_token_strict(&self, claims: &Claims) -> AuthResult<()> {
        match claims.kind() {
            TokenKind::WorkerAuth => Ok(()),
            TokenKind::UserAccess if claims.is_platform_admin() => Ok(()),
            TokenKind::ServerWorker if self.is_server_worker(claims) => Ok(()),
            TokenKind::UserAccess
            | TokenKind::ServerWorker
            | TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerBuildToken
            | TokenKind::IdRequestToken => Err(AuthError::forbidden(format!(
                "invalid token type {} for worker authentication",
                claims.kind()
            ))),
        }
    }

    /// Build-scoped access: the build token for this exact build, or a
    /// platform admin
    pub fn must_build_access(&self, claims: &Claims, build: &Build) -> AuthResult<()> {
        match claims.kind() {
            TokenKind::UserAccess if claims.is_platform_admin() => Ok(()),
            TokenKind::WorkerBuildToken => {
                if claims.build_id() == Some(build.id) {
                    return Ok(());
                }
                warn!(
                    subject = claims.subject(),
                    claimed_build = ?claims.build_id(),
                    requested_build = build.id,
                    "Build token presented for a different build"
                );
                Err(AuthError::forbidden(format!(
                    "token is not scoped to build {}",
                    build.id
                )))
            }
            TokenKind::UserAccess
            | TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::IdRequestToken
            | TokenKind::ServerWorker => Err(AuthError::forbidden(format!(
                "invalid token type {} for build access",
                claims.kind()
            ))),
        }
    }

    /// ID-token requests: an ID request token for this build, while it runs
    pub fn must_id_request_token(&self, claims: &Claims, build: &Build) -> AuthResult<()> {
        if claims.kind() != TokenKind::IdRequestToken {
            return Err(AuthError::forbidden(format!(
                "invalid token type {} for an ID token request",
                claims.kind()
            )));
        }

        if claims.build_id() != Some(build.id) {
            warn!(
                subject = claims.subject(),
                claimed_build = ?claims.build_id(),
                requested_build = build.id,
                "ID request token presented for a different build"
            );
            return Err(AuthError::forbidden(format!(
                "token is not scoped to build {}",
                build.id
            )));
        }

        if build.status != BuildStatus::Running {
            return Err(AuthError::BadRequest(format!(
                "build {} is not running",
                build.id
            )));
        }

        Ok(())
    }

    pub async fn must_admin(&self, claims: &Claims, repo: &Repo) -> AuthResult<()> {
        self.require_repo_level(claims, repo, AccessLevel::Admin).await
    }

    pub async fn must_write(&self, claims: &Claims, repo: &Repo) -> AuthResult<()> {
        self.require_repo_level(claims, repo, AccessLevel::Write).await
    }

    /// Read access. Public repos are readable by anyone authenticated, and a
    /// build token may read the repo of the build it is scoped to.
    pub async fn must_read(
        &self,
        claims: &Claims,
        repo: &Repo,
        build: Option<&Build>,
    ) -> AuthResult<()> {
        if claims.kind() == TokenKind::UserAccess && claims.is_platform_admin() {
            return Ok(());
        }

        if repo.is_public() {
            debug!(repo = %repo.full_name(), "Public repo, read allowed");
            return Ok(());
        }

        match claims.kind() {
            TokenKind::UserAccess => {
                self.require_repo_level(claims, repo, AccessLevel::Read)
                    .await
            }
            TokenKind::WorkerBuildToken => {
                let scoped = build.is_some_and(|build| {
                    claims.build_id() == Some(build.id) && build.repo_id == repo.id
                });
                if scoped {
                    return Ok(());
                }
                warn!(
                    subject = claims.subject(),
                    claimed_build = ?claims.build_id(),
                    requested_build = ?build.map(|b| b.id),
                    repo = %repo.full_name(),
                    "Build token presented outside its build"
                );
                Err(AuthError::forbidden(format!(
                    "token is not scoped to repo {}",
                    repo.full_name()
                )))
            }
            TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::IdRequestToken
            | TokenKind::ServerWorker => Err(AuthError::forbidden(format!(
                "invalid token type {} for repo access",
                claims.kind()
            ))),
        }
    }

    async fn require_repo_level(
        &self,
        claims: &Claims,
        repo: &Repo,
        required: AccessLevel,
    ) -> AuthResult<()> {
        match claims.kind() {
            TokenKind::UserAccess => {}
            TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::WorkerBuildToken
            | TokenKind::IdRequestToken
            | TokenKind::ServerWorker => {
                return Err(AuthError::forbidden(format!(
                    "invalid token type {} for repo access",
                    claims.kind()
                )))
            }
        }

        if claims.is_platform_admin() {
            debug!(subject = claims.subject(), "Platform admin, repo access allowed");
            return Ok(());
        }

        let user = self.caller(claims).await?;
        let level = self.repo_access_with_fallback(&user, repo).await;

        if level.satisfies(required) {
            return Ok(());
        }

        info!(
            subject = %user.name,
            repo = %repo.full_name(),
            level = %level,
            required = %required,
            "Repo access denied"
        );
        Err(AuthError::forbidden(format!(
            "user {} does not have '{}' permissions for the repo",
            user.name, required
        )))
    }

    /// The caller's live permission on a repo. If the lookup with the
    /// caller's credential fails it is retried once with the repo owner's
    /// credential for the same user name. A second failure is no access.
    pub async fn repo_access_with_fallback(&self, user: &User, repo: &Repo) -> AccessLevel {
        let first = self
            .scm_call(
                "repo_access",
                self.scm
                    .repo_access(&user.name, &user.token, &repo.org, &repo.name),
            )
            .await;

        let err = match first {
            Ok(level) => return level,
            Err(e) => e,
        };

        debug!(
            subject = %user.name,
            repo = %repo.full_name(),
            "Repo access lookup failed with caller credential, retrying with owner credential: {}",
            err
        );

        match self
            .scm_call(
                "repo_access",
                self.scm
                    .repo_access(&user.name, &repo.owner.token, &repo.org, &repo.name),
            )
            .await
        {
            Ok(level) => level,
            Err(e) => {
                error!(
                    subject = %user.name,
                    repo = %repo.full_name(),
                    "Repo access lookup failed, denying: {}",
                    e
                );
                AccessLevel::None
            }
        }
    }
}
