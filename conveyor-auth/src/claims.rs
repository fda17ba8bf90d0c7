//! Verified token claims
//!
//! [`Claims`] can only be obtained by verifying a token, so every value of
//! the type has passed the kind/field consistency check: build-scoped kinds
//! always carry a build, every other kind never does, and only user access
//! tokens may carry the platform admin flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TokenError;

/// Every token kind the platform issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    UserAccess,
    UserRefresh,
    WorkerRegister,
    WorkerAuth,
    WorkerBuildToken,
    IdRequestToken,
    ServerWorker,
}

/// Signing key a token kind is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyClass {
    Access,
    Refresh,
    Worker,
}

impl TokenKind {
    pub const ALL: [TokenKind; 7] = [
        TokenKind::UserAccess,
        TokenKind::UserRefresh,
        TokenKind::WorkerRegister,
        TokenKind::WorkerAuth,
        TokenKind::WorkerBuildToken,
        TokenKind::IdRequestToken,
        TokenKind::ServerWorker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::UserAccess => "user_access",
            TokenKind::UserRefresh => "user_refresh",
            TokenKind::WorkerRegister => "worker_register",
            TokenKind::WorkerAuth => "worker_auth",
            TokenKind::WorkerBuildToken => "worker_build_token",
            TokenKind::IdRequestToken => "id_request_token",
            TokenKind::ServerWorker => "server_worker",
        }
    }

    pub(crate) fn key_class(&self) -> KeyClass {
        match self {
            TokenKind::UserAccess => KeyClass::Access,
            TokenKind::UserRefresh => KeyClass::Refresh,
            TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::WorkerBuildToken
            | TokenKind::IdRequestToken
            | TokenKind::ServerWorker => KeyClass::Worker,
        }
    }

    /// Kinds that are bound to exactly one build
    pub fn is_build_scoped(&self) -> bool {
        match self {
            TokenKind::WorkerBuildToken | TokenKind::IdRequestToken => true,
            TokenKind::UserAccess
            | TokenKind::UserRefresh
            | TokenKind::WorkerRegister
            | TokenKind::WorkerAuth
            | TokenKind::ServerWorker => false,
        }
    }

    /// Kinds whose subject is a user rather than a worker hostname
    pub fn is_user(&self) -> bool {
        matches!(self, TokenKind::UserAccess | TokenKind::UserRefresh)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown token kind: {}", s))
    }
}

/// The build a build-scoped token is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScope {
    pub build_id: i64,
    /// `org/repo` of the build's repository
    pub repo_full_name: String,
}

/// Verified claims of a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    subject: String,
    kind: TokenKind,
    is_platform_admin: bool,
    build: Option<BuildScope>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Claims {
    /// User name or worker hostname
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Only ever true for user access tokens
    pub fn is_platform_admin(&self) -> bool {
        self.is_platform_admin
    }

    pub fn build(&self) -> Option<&BuildScope> {
        self.build.as_ref()
    }

    pub fn build_id(&self) -> Option<i64> {
        self.build.as_ref().map(|b| b.build_id)
    }

    pub fn repo_full_name(&self) -> Option<&str> {
        self.build.as_ref().map(|b| b.repo_full_name.as_str())
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Claims for the platform's own worker presenting the server secret
    pub(crate) fn server_worker(
        subject: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            kind: TokenKind::ServerWorker,
            is_platform_admin: false,
            build: None,
            issued_at,
            expires_at,
        }
    }
}

/// Signed payload as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireClaims {
    pub sub: String,
    pub token_type: TokenKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Only the kind; read before the signing key is chosen
#[derive(Debug, Deserialize)]
pub(crate) struct KindPeek {
    pub token_type: String,
}

impl From<&Claims> for WireClaims {
    fn from(claims: &Claims) -> Self {
        Self {
            sub: claims.subject.clone(),
            token_type: claims.kind,
            is_admin: claims.is_platform_admin,
            build_id: claims.build_id(),
            repo: claims.repo_full_name().map(str::to_string),
            iat: claims.issued_at.timestamp(),
            exp: claims.expires_at.timestamp(),
        }
    }
}

impl TryFrom<WireClaims> for Claims {
    type Error = TokenError;

    fn try_from(wire: WireClaims) -> Result<Self, Self::Error> {
        if wire.sub.is_empty() {
            return Err(TokenError::Malformed);
        }

        if wire.is_admin && wire.token_type != TokenKind::UserAccess {
            return Err(TokenError::Malformed);
        }

        let build = match (wire.token_type.is_build_scoped(), wire.build_id, wire.repo) {
            (true, Some(build_id), Some(repo_full_name)) if !repo_full_name.is_empty() => {
                Some(BuildScope {
                    build_id,
                    repo_full_name,
                })
            }
            (false, None, None) => None,
            _ => return Err(TokenError::Malformed),
        };

        let issued_at = DateTime::from_timestamp(wire.iat, 0).ok_or(TokenError::Malformed)?;
        let expires_at = DateTime::from_timestamp(wire.exp, 0).ok_or(TokenError::Malformed)?;

        Ok(Self {
            subject: wire.sub,
            kind: wire.token_type,
            is_platform_admin: wire.is_admin,
            build,
            issued_at,
            expires_at,
        })
    }
}

/// Assemble claims for minting; consistency is enforced by the caller
pub(crate) fn unchecked_claims(
    subject: String,
    kind: TokenKind,
    is_platform_admin: bool,
    build: Option<BuildScope>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Claims {
    Claims {
        subject,
        kind,
        is_platform_admin,
        build,
        issued_at,
        expires_at,
    }
}
