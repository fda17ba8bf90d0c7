//! Core data type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A platform user. `token` is the user's stored SCM credential and is
/// never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub token: String,
    /// Platform administrator flag
    pub admin: bool,
    pub active: bool,
}

impl User {
    pub fn new(id: i64, name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            token: token.into(),
            admin: false,
            active: true,
        }
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }
}

/// Repository visibility as reported by the SCM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

/// A repository enabled on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub org: String,
    pub name: String,
    /// SCM identifier of the owning org, refreshed on sync
    pub org_scm_id: String,
    /// SCM identifier of the repository itself, refreshed on sync
    pub scm_id: String,
    pub visibility: Visibility,
    /// User whose stored SCM token is the fallback credential for this repo
    pub owner: User,
    /// SCM app installation linkage
    pub install_id: Option<i64>,
    pub active: bool,
}

impl Repo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failure,
    Error,
    Canceled,
    Killed,
}

impl BuildStatus {
    /// Whether the build may still be handed work or tokens
    pub fn is_active(&self) -> bool {
        matches!(self, BuildStatus::Pending | BuildStatus::Running)
    }
}

/// A build belonging to a repository. `id` is globally unique, `number` is
/// unique within the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub status: BuildStatus,
    /// Hostname of the worker executing the build, once claimed
    pub host: Option<String>,
}

/// Secret scoping type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
    Org,
    Repo,
    /// Team-scoped secret
    Team,
    /// Secret shared with a team; same scoping rules as [`SecretType::Team`]
    Shared,
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretType::Org => write!(f, "org"),
            SecretType::Repo => write!(f, "repo"),
            SecretType::Team => write!(f, "team"),
            SecretType::Shared => write!(f, "shared"),
        }
    }
}

impl FromStr for SecretType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "org" => Ok(SecretType::Org),
            "repo" => Ok(SecretType::Repo),
            "team" => Ok(SecretType::Team),
            "shared" => Ok(SecretType::Shared),
            _ => Err(format!("invalid secret type: {}", s)),
        }
    }
}

/// A stored secret. The SCM identifier fields are the authority for access
/// decisions; `org` and `repo` are display names only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: i64,
    pub engine: String,
    pub secret_type: SecretType,
    pub org: String,
    /// Repo name for repo secrets, team name for team/shared secrets, `*` for org secrets
    pub repo: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub value: String,
    pub org_scm_id: Option<String>,
    pub repo_scm_id: Option<String>,
    pub team_scm_id: Option<String>,
    pub created_by: String,
}

/// Platform-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Repositories allowed to be enabled, `*` allows all
    pub repo_allowlist: Vec<String>,
    /// Repositories allowed to register schedules, `*` allows all
    pub schedule_allowlist: Vec<String>,
    /// Maximum number of concurrently running builds per repo
    pub max_build_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_allowlist: vec!["*".to_string()],
            schedule_allowlist: vec!["*".to_string()],
            max_build_limit: 10,
        }
    }
}

/// A registered build worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub hostname: String,
    pub active: bool,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

/// Permission level on an SCM resource, ordered `None < Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    /// Map a provider permission string to a level. Anything unrecognized,
    /// including the empty string, maps to [`AccessLevel::None`].
    pub fn from_scm(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "admin" => AccessLevel::Admin,
            "write" | "maintain" => AccessLevel::Write,
            "read" | "triage" => AccessLevel::Read,
            _ => AccessLevel::None,
        }
    }

    /// Whether this level satisfies `required` (admin ⊇ write ⊇ read)
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        required != AccessLevel::None && *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::None => write!(f, "none"),
            AccessLevel::Read => write!(f, "read"),
            AccessLevel::Write => write!(f, "write"),
            AccessLevel::Admin => write!(f, "admin"),
        }
    }
}

/// Live view of a repository as fetched from the SCM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmRepo {
    /// SCM identifier of the repository
    pub id: String,
    pub org: String,
    pub name: String,
    /// SCM identifier of the owning org
    pub org_id: String,
    pub visibility: Visibility,
}

/// A team as reported by the SCM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmTeam {
    /// SCM identifier of the team
    pub id: String,
    pub name: String,
    pub slug: String,
}

impl ScmTeam {
    /// Teams are addressed by either display name or slug
    pub fn matches(&self, team: &str) -> bool {
        self.slug.eq_ignore_ascii_case(team) || self.name.eq_ignore_ascii_case(team)
    }
}
