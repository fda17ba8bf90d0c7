//! Integration test helpers
//!
//! Spawns the full application on an ephemeral port, backed by a seeded
//! in-memory store and a scripted SCM.

#![allow(dead_code)]

use async_trait::async_trait;
use conveyor_auth::{MintTokenOpts, TokenManager};
use conveyor_core::{
    scm_error, AccessLevel, Build, BuildStatus, ConveyorConfig, ConveyorResult, Repo, ScmRepo,
    ScmTeam, User, Visibility,
};
use conveyor_scm::ScmClient;
use conveyor_server::{create_app, AppState, MemoryStore, Seed};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tokio::net::TcpListener;

// Ensure tracing is only initialized once
static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

/// SCM answering from fixed tables; anything unscripted is an outage
#[derive(Default)]
pub struct StubScm {
    /// keyed by the credential presented
    repo_levels: HashMap<String, AccessLevel>,
    /// keyed by user name
    org_levels: HashMap<String, AccessLevel>,
    /// keyed by (user name, team id)
    team_levels: HashMap<(String, String), AccessLevel>,
    org_ids: HashMap<String, String>,
    repos: HashMap<String, ScmRepo>,
    teams: HashMap<String, Vec<ScmTeam>>,
}

impl StubScm {
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

    pub fn repo(mut self, org: &str, name: &str, id: &str, org_id: &str) -> Self {
        self.repos.insert(
            format!("{}/{}", org, name),
            ScmRepo {
                id: id.to_string(),
                org: org.to_string(),
                name: name.to_string(),
                org_id: org_id.to_string(),
                visibility: Visibility::Private,
            },
        );
        self
    }

    pub fn user_teams(mut self, user: &str, teams: Vec<ScmTeam>) -> Self {
        self.teams.insert(user.to_string(), teams);
        self
    }
}

#[async_trait]
impl ScmClient for StubScm {
    async fn repo_access(
        &self,
        _username: &str,
        token: &str,
        _org: &str,
        _repo: &str,
    ) -> ConveyorResult<AccessLevel> {
        self.repo_levels
            .get(token)
            .copied()
            .ok_or_else(|| scm_error!("bad credentials", "stub_scm", status = 401))
    }

    async fn org_access(&self, user: &User, _org: &str) -> ConveyorResult<AccessLevel> {
        Ok(self
            .org_levels
            .get(&user.name)
            .copied()
            .unwrap_or(AccessLevel::None))
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
            .ok_or_else(|| scm_error!("org not found", "stub_scm", status = 404))
    }

    async fn get_repo(&self, _user: &User, org: &str, name: &str) -> ConveyorResult<ScmRepo> {
        self.repos
            .get(&format!("{}/{}", org, name))
            .cloned()
            .ok_or_else(|| scm_error!("repo not found", "stub_scm", status = 404))
    }

    async fn list_users_teams_for_org(
        &self,
        user: &User,
        _org: &str,
    ) -> ConveyorResult<Vec<ScmTeam>> {
        Ok(self.teams.get(&user.name).cloned().unwrap_or_default())
    }
}

pub fn user(id: i64, name: &str, token: &str) -> User {
    User::new(id, name, token)
}

pub fn owner() -> User {
    user(1, "octocat", "owner-token")
}

/// Records shared by every test: a private and a public repo under `octo`,
/// with two builds on the private one
pub fn seed() -> Seed {
    let private = Repo {
        id: 10,
        org: "octo".to_string(),
        name: "hello".to_string(),
        org_scm_id: "100".to_string(),
        scm_id: "200".to_string(),
        visibility: Visibility::Private,
        owner: owner(),
        install_id: None,
        active: true,
    };
    let public = Repo {
        id: 11,
        name: "site".to_string(),
        scm_id: "201".to_string(),
        visibility: Visibility::Public,
        ..private.clone()
    };

    Seed {
        users: vec![
            owner(),
            user(2, "alice", "alice-token"),
            user(3, "bob", "bob-token"),
            user(4, "root", "root-token").with_admin(true),
        ],
        repos: vec![private, public],
        builds: vec![
            Build {
                id: 1,
                repo_id: 10,
                number: 1,
                status: BuildStatus::Pending,
                host: None,
            },
            Build {
                id: 2,
                repo_id: 10,
                number: 2,
                status: BuildStatus::Running,
                host: None,
            },
        ],
        ..Default::default()
    }
}

pub fn config() -> ConveyorConfig {
    let mut config = ConveyorConfig::default();
    config.auth.access_secret = "test-access-key".to_string();
    config.auth.refresh_secret = "test-refresh-key".to_string();
    config.auth.worker_secret = "test-worker-key".to_string();
    config.scm.timeout_ms = 1_000;
    config
}

/// Running test application
pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    pub tokens: Arc<TokenManager>,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.address, path)
    }

    /// Access token for a seeded user, admin flag taken from the seed
    pub async fn user_token(&self, name: &str) -> String {
        use conveyor_core::Storage;
        let user = self.store.get_user(name).await.expect("seeded user");
        self.tokens
            .mint(&MintTokenOpts::user_access(&user))
            .expect("mint user token")
    }

    pub fn mint(&self, opts: &MintTokenOpts) -> String {
        self.tokens.mint(opts).expect("mint token")
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.api_client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to execute request.")
    }

    pub async fn send_json<Body>(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: &Body,
    ) -> reqwest::Response
    where
        Body: serde::Serialize,
    {
        let mut request = self.api_client.request(method, self.url(path)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to execute request.")
    }

    pub async fn post<Body>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Body,
    ) -> reqwest::Response
    where
        Body: serde::Serialize,
    {
        self.send_json(reqwest::Method::POST, path, token, body).await
    }

    pub async fn health(&self) -> reqwest::Response {
        self.api_client
            .get(format!("{}/health", self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

/// Start the application with the default seed
pub async fn spawn_app(scm: StubScm) -> TestApp {
    spawn_app_with_seed(scm, seed()).await
}

pub async fn spawn_app_with_seed(scm: StubScm, seed: Seed) -> TestApp {
    LazyLock::force(&TRACING);

    let store = Arc::new(MemoryStore::from_seed(seed));
    let state = AppState::new(config(), store.clone(), Arc::new(scm));
    let tokens = state.tokens.clone();
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        api_client: reqwest::Client::new(),
        tokens,
        store,
    }
}

pub fn team(id: &str, slug: &str) -> ScmTeam {
    ScmTeam {
        id: id.to_string(),
        name: slug.to_string(),
        slug: slug.to_string(),
    }
}
