//! Token minting and verification
//!
//! Tokens are HS256 JWTs. Each kind is bound to one of three keys: user
//! access tokens to the access key, refresh tokens to the refresh key, and
//! every worker-facing kind to the shared worker key. Verification reads the
//! claimed kind first, picks the key that kind is bound to and only then
//! checks the signature, so a token signed with the wrong key for its kind
//! never verifies.

use chrono::{DateTime, Duration, Utc};
use conveyor_core::{AuthConfig, Build, Repo, TokenDurations, User};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::claims::{
    unchecked_claims, BuildScope, Claims, KeyClass, KindPeek, TokenKind, WireClaims,
};
use crate::error::TokenError;

/// Signing and verification key pair for one key class
struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Who a token is minted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User { name: String, admin: bool },
    Worker { hostname: String },
}

impl Actor {
    fn subject(&self) -> &str {
        match self {
            Actor::User { name, .. } => name,
            Actor::Worker { hostname } => hostname,
        }
    }
}

/// Options for [`TokenManager::mint`]
#[derive(Debug, Clone)]
pub struct MintTokenOpts {
    pub kind: TokenKind,
    pub actor: Actor,
    pub build: Option<BuildScope>,
    /// Overrides the configured lifetime for the kind
    pub duration: Option<Duration>,
}

impl MintTokenOpts {
    fn for_user(kind: TokenKind, user: &User) -> Self {
        Self {
            kind,
            actor: Actor::User {
                name: user.name.clone(),
                admin: user.admin,
            },
            build: None,
            duration: None,
        }
    }

    fn for_worker(kind: TokenKind, hostname: &str) -> Self {
        Self {
            kind,
            actor: Actor::Worker {
                hostname: hostname.to_string(),
            },
            build: None,
            duration: None,
        }
    }

    pub fn user_access(user: &User) -> Self {
        Self::for_user(TokenKind::UserAccess, user)
    }

    pub fn user_refresh(user: &User) -> Self {
        Self::for_user(TokenKind::UserRefresh, user)
    }

    pub fn worker_register(hostname: &str) -> Self {
        Self::for_worker(TokenKind::WorkerRegister, hostname)
    }

    pub fn worker_auth(hostname: &str) -> Self {
        Self::for_worker(TokenKind::WorkerAuth, hostname)
    }

    pub fn server_worker(subject: &str) -> Self {
        Self::for_worker(TokenKind::ServerWorker, subject)
    }

    pub fn worker_build(hostname: &str, build: &Build, repo: &Repo) -> Self {
        Self::for_worker(TokenKind::WorkerBuildToken, hostname).with_build(build, repo)
    }

    pub fn id_request(hostname: &str, build: &Build, repo: &Repo) -> Self {
        Self::for_worker(TokenKind::IdRequestToken, hostname).with_build(build, repo)
    }

    pub fn with_build(mut self, build: &Build, repo: &Repo) -> Self {
        self.build = Some(BuildScope {
            build_id: build.id,
            repo_full_name: repo.full_name(),
        });
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// A freshly minted token and when it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies every token kind
pub struct TokenManager {
    access: Keys,
    refresh: Keys,
    worker: Keys,
    server_secret_digest: Option<Vec<u8>>,
    server_worker_subject: String,
    durations: TokenDurations,
}

impl TokenManager {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: Keys::new(config.access_secret.as_bytes()),
            refresh: Keys::new(config.refresh_secret.as_bytes()),
            worker: Keys::new(config.worker_secret.as_bytes()),
            server_secret_digest: config
                .server_secret
                .as_deref()
                .filter(|secret| !secret.is_empty())
                .map(|secret| Sha256::digest(secret.as_bytes()).to_vec()),
            server_worker_subject: config.server_worker_subject.clone(),
            durations: config.durations.clone(),
        }
    }

    pub fn server_worker_subject(&self) -> &str {
        &self.server_worker_subject
    }

    fn keys(&self, class: KeyClass) -> &Keys {
        match class {
            KeyClass::Access => &self.access,
            KeyClass::Refresh => &self.refresh,
            KeyClass::Worker => &self.worker,
        }
    }

    /// Configured lifetime for a kind
    pub fn default_duration(&self, kind: TokenKind) -> Result<Duration, TokenError> {
        let seconds = match kind {
            TokenKind::UserAccess => self.durations.user_access,
            TokenKind::UserRefresh => self.durations.user_refresh,
            TokenKind::WorkerRegister => self.durations.worker_register,
            TokenKind::WorkerAuth => self.durations.worker_auth,
            TokenKind::WorkerBuildToken => self.durations.worker_build,
            TokenKind::IdRequestToken => self.durations.id_request,
            TokenKind::ServerWorker => self.durations.server_worker,
        };
        Duration::try_seconds(seconds).ok_or_else(|| {
            TokenError::InvalidOptions(format!("{} token lifetime is out of range", kind))
        })
    }

    fn expiry(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, TokenError> {
        now.checked_add_signed(duration)
            .ok_or_else(|| TokenError::InvalidOptions("token lifetime is out of range".to_string()))
    }

    fn build_claims(&self, opts: &MintTokenOpts, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let subject = opts.actor.subject();
        if subject.trim().is_empty() {
            return Err(TokenError::InvalidOptions("subject must not be empty".to_string()));
        }

        let admin = match (&opts.actor, opts.kind) {
            (Actor::User { admin, .. }, TokenKind::UserAccess) => *admin,
            (Actor::User { .. }, TokenKind::UserRefresh) => false,
            (Actor::Worker { .. }, kind) if !kind.is_user() => false,
            (_, kind) => {
                return Err(TokenError::InvalidOptions(format!(
                    "{} tokens cannot be minted for this actor",
                    kind
                )))
            }
        };

        match (&opts.build, opts.kind.is_build_scoped()) {
            (Some(build), true) if build.repo_full_name.is_empty() => {
                return Err(TokenError::InvalidOptions(
                    "build repository must be set".to_string(),
                ))
            }
            (Some(_), true) | (None, false) => {}
            (None, true) => {
                return Err(TokenError::InvalidOptions(format!(
                    "{} tokens require a build",
                    opts.kind
                )))
            }
            (Some(_), false) => {
                return Err(TokenError::InvalidOptions(format!(
                    "{} tokens cannot be bound to a build",
                    opts.kind
                )))
            }
        }

        if opts.kind == TokenKind::ServerWorker && subject != self.server_worker_subject {
            return Err(TokenError::InvalidOptions(format!(
                "server worker tokens must use subject {}",
                self.server_worker_subject
            )));
        }

        let duration = match opts.duration {
            Some(duration) => duration,
            None => self.default_duration(opts.kind)?,
        };
        let expires_at = Self::expiry(now, duration)?;

        Ok(unchecked_claims(
            subject.to_string(),
            opts.kind,
            admin,
            opts.build.clone(),
            now,
            expires_at,
        ))
    }

    /// Mint a token and report its expiry
    pub fn issue(&self, opts: &MintTokenOpts) -> Result<IssuedToken, TokenError> {
        let claims = self.build_claims(opts, Utc::now())?;
        let keys = self.keys(opts.kind.key_class());

        let token = encode(
            &Header::new(Algorithm::HS256),
            &WireClaims::from(&claims),
            &keys.encoding,
        )
        .map_err(|e| {
            warn!("Failed to encode JWT: {}", e);
            TokenError::Creation
        })?;

        debug!(
            subject = claims.subject(),
            kind = %claims.kind(),
            build = ?claims.build_id(),
            "Minted token"
        );

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
        })
    }

    /// Mint a signed token
    pub fn mint(&self, opts: &MintTokenOpts) -> Result<String, TokenError> {
        self.issue(opts).map(|issued| issued.token)
    }

    /// Verify a bearer value and return its claims
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        if self.is_server_secret(token) {
            let now = Utc::now();
            let expires_at = Self::expiry(now, self.default_duration(TokenKind::ServerWorker)?)?;
            debug!(subject = %self.server_worker_subject, "Server secret presented");
            return Ok(Claims::server_worker(
                &self.server_worker_subject,
                now,
                expires_at,
            ));
        }

        let kind = self.peek_kind(token)?;
        let keys = self.keys(kind.key_class());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<WireClaims>(token, &keys.decoding, &validation).map_err(|e| {
            debug!(kind = %kind, "JWT verification failed: {}", e);
            verification_error(e.kind())
        })?;

        if data.claims.token_type != kind {
            return Err(TokenError::Malformed);
        }

        Claims::try_from(data.claims)
    }

    /// Read the claimed kind without trusting anything else in the payload
    fn peek_kind(&self, token: &str) -> Result<TokenKind, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let peeked = decode::<KindPeek>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| {
                debug!("Unable to read token kind: {}", e);
                TokenError::Malformed
            })?;

        peeked.claims.token_type.parse::<TokenKind>().map_err(|e| {
            warn!("Rejected token claiming an unrecognized kind: {}", e);
            TokenError::Malformed
        })
    }

    fn is_server_secret(&self, token: &str) -> bool {
        match &self.server_secret_digest {
            Some(expected) => {
                let presented = Sha256::digest(token.as_bytes());
                bool::from(presented.as_slice().ct_eq(expected.as_slice()))
            }
            None => false,
        }
    }
}

fn verification_error(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
        _ => TokenError::Malformed,
    }
}
