//! In-memory storage
//!
//! Backs the [`Storage`] lookups the auth core consumes, plus the writes the
//! server's own handlers perform. Optionally seeded from a JSON file.

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::{
    not_found_error, Build, BuildStatus, ConveyorError, ConveyorResult, ErrorContext, Repo,
    Secret, SecretType, Settings, Storage, User, Visibility, Worker,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

const COMPONENT: &str = "memory_store";

/// Initial records loaded at startup
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub users: Vec<User>,
    pub repos: Vec<Repo>,
    pub builds: Vec<Build>,
    pub secrets: Vec<Secret>,
    pub settings: Option<Settings>,
}

impl Seed {
    pub fn load(path: &Path) -> ConveyorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConveyorError::Config {
            message: format!("Invalid seed file {}: {}", path.display(), e),
            source: Some(Box::new(e)),
            context: ErrorContext::new(COMPONENT).with_operation("load_seed"),
        })
    }
}

/// Fields a repo admin may change
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RepoUpdate {
    pub visibility: Option<Visibility>,
    pub active: Option<bool>,
}

/// A secret to create; SCM identifiers are captured by the caller
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub engine: String,
    pub secret_type: SecretType,
    pub org: String,
    pub repo: String,
    pub name: String,
    pub value: String,
    pub org_scm_id: Option<String>,
    pub repo_scm_id: Option<String>,
    pub team_scm_id: Option<String>,
    pub created_by: String,
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    repos: HashMap<i64, Repo>,
    builds: HashMap<i64, Build>,
    secrets: Vec<Secret>,
    workers: HashMap<String, Worker>,
    settings: Settings,
    next_build_id: i64,
    next_secret_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let mut tables = Tables {
            settings: seed.settings.unwrap_or_default(),
            ..Default::default()
        };

        for user in seed.users {
            tables.users.insert(user.name.clone(), user);
        }
        for repo in seed.repos {
            tables.repos.insert(repo.id, repo);
        }
        for build in seed.builds {
            tables.next_build_id = tables.next_build_id.max(build.id);
            tables.builds.insert(build.id, build);
        }
        tables.next_secret_id = seed.secrets.iter().map(|s| s.id).max().unwrap_or(0);
        tables.secrets = seed.secrets;

        info!(
            users = tables.users.len(),
            repos = tables.repos.len(),
            builds = tables.builds.len(),
            "Seeded in-memory store"
        );

        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn upsert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.name.clone(), user);
    }

    pub async fn insert_repo(&self, repo: Repo) {
        self.tables.write().await.repos.insert(repo.id, repo);
    }

    pub async fn insert_build(&self, build: Build) {
        let mut tables = self.tables.write().await;
        tables.next_build_id = tables.next_build_id.max(build.id);
        tables.builds.insert(build.id, build);
    }

    pub async fn update_repo(&self, id: i64, update: RepoUpdate) -> ConveyorResult<Repo> {
        let mut tables = self.tables.write().await;
        let repo = tables
            .repos
            .get_mut(&id)
            .ok_or_else(|| not_found_error!(format!("repo {}", id), COMPONENT))?;

        if let Some(visibility) = update.visibility {
            repo.visibility = visibility;
        }
        if let Some(active) = update.active {
            repo.active = active;
        }

        Ok(repo.clone())
    }

    /// Create a pending build with the next number for the repo
    pub async fn create_build(&self, repo: &Repo) -> Build {
        let mut tables = self.tables.write().await;
        tables.next_build_id += 1;

        let number = tables
            .builds
            .values()
            .filter(|b| b.repo_id == repo.id)
            .map(|b| b.number)
            .max()
            .unwrap_or(0)
            + 1;

        let build = Build {
            id: tables.next_build_id,
            repo_id: repo.id,
            number,
            status: BuildStatus::Pending,
            host: None,
        };
        tables.builds.insert(build.id, build.clone());

        debug!(repo = %repo.full_name(), build = build.id, number, "Created build");
        build
    }

    pub async fn update_build(
        &self,
        id: i64,
        status: BuildStatus,
        host: Option<String>,
    ) -> ConveyorResult<Build> {
        let mut tables = self.tables.write().await;
        let build = tables
            .builds
            .get_mut(&id)
            .ok_or_else(|| not_found_error!(format!("build {}", id), COMPONENT))?;

        build.status = status;
        if host.is_some() {
            build.host = host;
        }
        Ok(build.clone())
    }

    pub async fn create_secret(&self, new: NewSecret) -> ConveyorResult<Secret> {
        let mut tables = self.tables.write().await;

        let exists = tables.secrets.iter().any(|s| {
            s.engine == new.engine
                && s.secret_type == new.secret_type
                && s.org == new.org
                && s.repo == new.repo
                && s.name == new.name
        });
        if exists {
            return Err(ConveyorError::Validation {
                message: format!("secret {} already exists", new.name),
                field: Some("name".to_string()),
                context: ErrorContext::new(COMPONENT).with_operation("create_secret"),
            });
        }

        tables.next_secret_id += 1;
        let secret = Secret {
            id: tables.next_secret_id,
            engine: new.engine,
            secret_type: new.secret_type,
            org: new.org,
            repo: new.repo,
            name: new.name,
            value: new.value,
            org_scm_id: new.org_scm_id,
            repo_scm_id: new.repo_scm_id,
            team_scm_id: new.team_scm_id,
            created_by: new.created_by,
        };
        tables.secrets.push(secret.clone());
        Ok(secret)
    }

    pub async fn update_secret_value(&self, id: i64, value: String) -> ConveyorResult<Secret> {
        let mut tables = self.tables.write().await;
        let secret = tables
            .secrets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found_error!(format!("secret {}", id), COMPONENT))?;
        secret.value = value;
        Ok(secret.clone())
    }

    /// Secrets at a scope. A `*` name lists every team or shared secret in
    /// the org.
    pub async fn list_secrets(
        &self,
        engine: &str,
        secret_type: SecretType,
        org: &str,
        name: &str,
    ) -> Vec<Secret> {
        let wildcard = name == "*" && matches!(secret_type, SecretType::Team | SecretType::Shared);

        self.tables
            .read()
            .await
            .secrets
            .iter()
            .filter(|s| s.engine == engine && s.secret_type == secret_type && s.org == org)
            .filter(|s| wildcard || s.repo == name)
            .cloned()
            .collect()
    }

    pub async fn register_worker(&self, hostname: &str) -> Worker {
        let worker = Worker {
            hostname: hostname.to_string(),
            active: true,
            registered_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .workers
            .insert(worker.hostname.clone(), worker.clone());
        worker
    }

    pub async fn get_worker(&self, hostname: &str) -> ConveyorResult<Worker> {
        self.tables
            .read()
            .await
            .workers
            .get(hostname)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("worker {}", hostname), COMPONENT))
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_user(&self, name: &str) -> ConveyorResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("user {}", name), COMPONENT))
    }

    async fn get_repo_for_org(&self, org: &str, name: &str) -> ConveyorResult<Repo> {
        self.tables
            .read()
            .await
            .repos
            .values()
            .find(|r| r.org == org && r.name == name)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("repo {}/{}", org, name), COMPONENT))
    }

    async fn get_repo(&self, id: i64) -> ConveyorResult<Repo> {
        self.tables
            .read()
            .await
            .repos
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("repo {}", id), COMPONENT))
    }

    async fn get_build(&self, id: i64) -> ConveyorResult<Build> {
        self.tables
            .read()
            .await
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("build {}", id), COMPONENT))
    }

    async fn get_build_for_repo(&self, repo: &Repo, number: i64) -> ConveyorResult<Build> {
        self.tables
            .read()
            .await
            .builds
            .values()
            .find(|b| b.repo_id == repo.id && b.number == number)
            .cloned()
            .ok_or_else(|| {
                not_found_error!(
                    format!("build {} for repo {}", number, repo.full_name()),
                    COMPONENT
                )
            })
    }

    async fn get_secret(
        &self,
        engine: &str,
        secret_type: SecretType,
        org: &str,
        name: &str,
        path: &str,
    ) -> ConveyorResult<Secret> {
        self.tables
            .read()
            .await
            .secrets
            .iter()
            .find(|s| {
                s.engine == engine
                    && s.secret_type == secret_type
                    && s.org == org
                    && s.repo == name
                    && s.name == path
            })
            .cloned()
            .ok_or_else(|| not_found_error!(format!("secret {}", path), COMPONENT))
    }

    async fn get_settings(&self) -> ConveyorResult<Settings> {
        Ok(self.tables.read().await.settings.clone())
    }
}
