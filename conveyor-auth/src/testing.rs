//! In-memory storage and SCM doubles for guard tests

use async_trait::async_trait;
use conveyor_core::{
    not_found_error, scm_error, AccessLevel, Build, BuildStatus, ConveyorResult, Repo, ScmRepo,
    ScmTeam, Secret, SecretType, Settings, Storage, User, Visibility,
};
use conveyor_scm::ScmClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::permissions::{EngineConfig, PermissionEngine};

#[derive(Default)]
pub(crate) struct MockStorage {
    pub users: HashMap<String, User>,
    pub repos: Vec<Repo>,
    pub builds: Vec<Build>,
    pub secrets: Vec<Secret>,
}

impl MockStorage {
    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.name.clone(), user);
        self
    }

    pub fn with_repo(mut self, repo: Repo) -> Self {
        self.repos.push(repo);
        self
    }

    pub fn with_build(mut self, build: Build) -> Self {
        self.builds.push(build);
        self
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn get_user(&self, name: &str) -> ConveyorResult<User> {
        self.users
            .get(name)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("user {}", name), "mock_storage"))
    }

    async fn get_repo_for_org(&self, org: &str, name: &str) -> ConveyorResult<Repo> {
        self.repos
            .iter()
            .find(|r| r.org == org && r.name == name)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("repo {}/{}", org, name), "mock_storage"))
    }

    async fn get_repo(&self, id: i64) -> ConveyorResult<Repo> {
        self.repos
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("repo {}", id), "mock_storage"))
    }

    async fn get_build(&self, id: i64) -> ConveyorResult<Build> {
        self.builds
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("build {}", id), "mock_storage"))
    }

    async fn get_build_for_repo(&self, repo: &Repo, number: i64) -> ConveyorResult<Build> {
        self.builds
            .iter()
            .find(|b| b.repo_id == repo.id && b.number == number)
            .cloned()
            .ok_or_else(|| not_found_error!(format!("build {}", number), "mock_storage"))
    }

    async fn get_secret(
        &self,
        engine: &str,
        secret_type: SecretType,
        org: &str,
        name: &str,
        path: &str,
    ) -> ConveyorResult<Secret> {
        self.secrets
            .iter()
            .find(|s| {
                s.engine == engine
                    && s.secret_type == secret_type
                    && s.org == org
                    && s.repo == name
                    && s.name == path
            })
            .cloned()
            .ok_or_else(|| not_found_error!(format!("secret {}", path), "mock_storage"))
    }

    async fn get_settings(&self) -> ConveyorResult<Settings> {
        Ok(Settings::default())
    }
}

/// SCM double. Anything not configured fails the way an unreachable
/// provider would.
#[derive(Default)]
pub(crate) struct MockScm {
    /// repo access keyed by the credential presented
    pub repo_levels: HashMap<String, AccessLevel>,
    pub org_levels: HashMap<String, AccessLevel>,
    /// team access keyed by `(user, team_id)`
    pub team_levels: HashMap<(String, String), AccessLevel>,
    pub org_ids: HashMap<String, String>,
    pub repo_ids: HashMap<String, String>,
    pub teams: HashMap<String, Vec<ScmTeam>>,
    pub repo_access_calls: AtomicUsize,
    pub tokens_presented: Mutex<Vec<String>>,
}

impl MockScm {
    pub fn repo_level(mut self, token: &str, level: AccessLevel) -> Self {
        self.repo_levels.insert(token.to_string(), level);
        self
    }

    pub fn org_level(mut self, user: &str, level: AccessLevel) -> Self {
        self.org_levels.insert(user.to_string(), level);
        self
    }

    pub fn team_level(mut self, user: &str, team_id: &str, level: AccessLevel) -> Self {
        self.team_levels
            .insert((user.to_string(), team_id.to_string()), level);
        self
    }

    pub fn org_id(mut self, org: &str, id: &str) -> Self {
        self.org_ids.insert(org.to_string(), id.to_string());
        self
    }

    pub fn repo_id(mut self, full_name: &str, id: &str) -> Self {
        self.repo_ids.insert(full_name.to_string(), id.to_string());
        self
    }

    pub fn user_teams(mut self, user: &str, teams: Vec<ScmTeam>) -> Self {
        self.teams.insert(user.to_string(), teams);
        self
    }

    pub fn calls(&self) -> usize {
        self.repo_access_calls.load(Ordering::SeqCst)
    }

    pub fn presented(&self) -> Vec<String> {
        self.tokens_presented.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScmClient for MockScm {
    async fn repo_access(
        &self,
        _username: &str,
        token: &str,
        _org: &str,
        _repo: &str,
    ) -> ConveyorResult<AccessLevel> {
        self.repo_access_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_presented.lock().unwrap().push(token.to_string());
        self.repo_levels
            .get(token)
            .copied()
            .ok_or_else(|| scm_error!("bad credentials", "mock_scm", status = 401))
    }

    async fn org_access(&self, user: &User, _org: &str) -> ConveyorResult<AccessLevel> {
        self.org_levels
            .get(&user.name)
            .copied()
            .ok_or_else(|| scm_error!("membership lookup failed", "mock_scm", status = 502))
    }

    async fn team_access(
        &self,
        user: &User,
        _org: &str,
        _team: &str,
        _org_id: &str,
        team_id: &str,
    ) -> ConveyorResult<AccessLevel> {
        Ok(self
            .team_levels
            .get(&(user.name.clone(), team_id.to_string()))
            .copied()
            .unwrap_or(AccessLevel::None))
    }

    async fn get_org_identifiers(
        &self,
        _user: &User,
        org: &str,
    ) -> ConveyorResult<(String, String)> {
        self.org_ids
            .get(org)
            .map(|id| (org.to_string(), id.clone()))
            .ok_or_else(|| scm_error!("org lookup failed", "mock_scm", status = 404))
    }

    async fn get_repo(&self, _user: &User, org: &str, name: &str) -> ConveyorResult<ScmRepo> {
        let full_name = format!("{}/{}", org, name);
        let id = self
            .repo_ids
            .get(&full_name)
            .ok_or_else(|| scm_error!("repo lookup failed", "mock_scm", status = 404))?;
        Ok(ScmRepo {
            id: id.clone(),
            org: org.to_string(),
            name: name.to_string(),
            org_id: self.org_ids.get(org).cloned().unwrap_or_default(),
            visibility: Visibility::Private,
        })
    }

    async fn list_users_teams_for_org(
        &self,
        user: &User,
        _org: &str,
    ) -> ConveyorResult<Vec<ScmTeam>> {
        self.teams
            .get(&user.name)
            .cloned()
            .ok_or_else(|| scm_error!("team listing failed", "mock_scm", status = 502))
    }
}

pub(crate) fn engine(storage: MockStorage, scm: MockScm) -> (PermissionEngine, Arc<MockScm>) {
    let scm = Arc::new(scm);
    let engine = PermissionEngine::new(
        Arc::new(storage),
        scm.clone(),
        EngineConfig {
            server_worker_subject: "conveyor-server".to_string(),
            scm_timeout_ms: 1_000,
        },
    );
    (engine, scm)
}

pub(crate) fn owner() -> User {
    User::new(1, "octocat", "owner-token")
}

pub(crate) fn private_repo() -> Repo {
    Repo {
        id: 10,
        org: "octo".to_string(),
        name: "hello".to_string(),
        org_scm_id: "100".to_string(),
        scm_id: "200".to_string(),
        visibility: Visibility::Private,
        owner: owner(),
        install_id: None,
        active: true,
    }
}

pub(crate) fn build(id: i64, repo_id: i64, status: BuildStatus) -> Build {
    Build {
        id,
        repo_id,
        number: id,
        status,
        host: Some("worker-1".to_string()),
    }
}

pub(crate) fn team(id: &str, slug: &str) -> ScmTeam {
    ScmTeam {
        id: id.to_string(),
        name: slug.to_string(),
        slug: slug.to_string(),
    }
}
