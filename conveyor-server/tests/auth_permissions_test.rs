//! End-to-end authentication and permission tests

mod helpers;

use conveyor_auth::{MintTokenOpts, TokenKind};
use conveyor_core::{AccessLevel, BuildStatus, Secret, SecretType};
use helpers::{owner, seed, spawn_app, spawn_app_with_seed, team, StubScm};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

fn org_secret(id: i64, name: &str, org_scm_id: &str) -> Secret {
    Secret {
        id,
        engine: "native".to_string(),
        secret_type: SecretType::Org,
        org: "octo".to_string(),
        repo: "*".to_string(),
        name: name.to_string(),
        value: "s3cr3t".to_string(),
        org_scm_id: Some(org_scm_id.to_string()),
        repo_scm_id: None,
        team_scm_id: None,
        created_by: "bob".to_string(),
    }
}

/// Build token for a seeded build of octo/hello
fn build_token_opts(build_id: i64) -> MintTokenOpts {
    let seed = seed();
    let repo = seed.repos.iter().find(|r| r.id == 10).unwrap().clone();
    let build = seed.builds.iter().find(|b| b.id == build_id).unwrap().clone();
    MintTokenOpts::worker_build("worker-1", &build, &repo)
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app(StubScm::default()).await;

    let response = app.health().await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_invalid_token_is_unauthorized() {
    let app = spawn_app(StubScm::default()).await;

    let response = app.get("/repos/octo/hello", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/repos/octo/hello", Some("not-a-token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "token is malformed");
}

#[tokio::test]
async fn test_refresh_takes_admin_flag_from_stored_user() {
    let app = spawn_app(StubScm::default()).await;
    let root = conveyor_core::User::new(4, "root", "").with_admin(true);
    let refresh = app.mint(&MintTokenOpts::user_refresh(&root));

    let response = app
        .post("/auth/refresh", None, &json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let access = body["token"].as_str().unwrap().to_string();
    let claims = app.tokens.parse(&access).unwrap();
    assert_eq!(claims.kind(), TokenKind::UserAccess);
    assert_eq!(claims.subject(), "root");
    assert!(claims.is_platform_admin());

    let response = app.get("/admin/settings", Some(&access)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_rejects_access_token_and_unknown_user() {
    let app = spawn_app(StubScm::default()).await;

    let access = app.user_token("alice").await;
    let response = app
        .post("/auth/refresh", None, &json!({ "refresh_token": access }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let ghost = conveyor_core::User::new(99, "ghost", "");
    let refresh = app.mint(&MintTokenOpts::user_refresh(&ghost));
    let response = app
        .post("/auth/refresh", None, &json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_token_is_not_a_bearer_credential() {
    let app = spawn_app(StubScm::default()).await;
    let root = conveyor_core::User::new(4, "root", "").with_admin(true);
    let refresh = app.mint(&MintTokenOpts::user_refresh(&root));

    let response = app.get("/admin/settings", Some(&refresh)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_settings_require_platform_admin() {
    let app = spawn_app(StubScm::default()).await;

    let alice = app.user_token("alice").await;
    let response = app.get("/admin/settings", Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let root = app.user_token("root").await;
    let response = app.get("/admin/settings", Some(&root)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["max_build_limit"], 10);
}

#[tokio::test]
async fn test_private_repo_read_uses_scm_access() {
    let scm = StubScm::default().repo_level("alice-token", AccessLevel::Read);
    let app = spawn_app(scm).await;

    let alice = app.user_token("alice").await;
    let response = app.get("/repos/octo/hello", Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "hello");

    // neither bob's credential nor the owner fallback is recognized
    let bob = app.user_token("bob").await;
    let response = app.get("/repos/octo/hello", Some(&bob)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_owner_credential_fallback_grants_access() {
    let scm = StubScm::default().repo_level(&owner().token, AccessLevel::Read);
    let app = spawn_app(scm).await;

    let bob = app.user_token("bob").await;
    let response = app.get("/repos/octo/hello", Some(&bob)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_public_repo_read_without_scm() {
    let app = spawn_app(StubScm::default()).await;

    let bob = app.user_token("bob").await;
    let response = app.get("/repos/octo/site", Some(&bob)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_repo_is_not_found() {
    let app = spawn_app(StubScm::default()).await;

    let alice = app.user_token("alice").await;
    let response = app.get("/repos/octo/missing", Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_build_requires_write() {
    let scm = StubScm::default()
        .repo_level("alice-token", AccessLevel::Read)
        .repo_level("bob-token", AccessLevel::Write);
    let app = spawn_app(scm).await;

    let alice = app.user_token("alice").await;
    let response = app.post("/repos/octo/hello/builds", Some(&alice), &json!({})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bob = app.user_token("bob").await;
    let response = app.post("/repos/octo/hello/builds", Some(&bob), &json!({})).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["number"], 3);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_update_repo_requires_admin() {
    let scm = StubScm::default()
        .repo_level("bob-token", AccessLevel::Write)
        .repo_level("owner-token", AccessLevel::Admin);
    let app = spawn_app(scm).await;
    let update = json!({ "visibility": "public" });

    let bob = app.user_token("bob").await;
    let response = app
        .send_json(Method::PATCH, "/repos/octo/hello", Some(&bob), &update)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let owner = app.user_token("octocat").await;
    let response = app
        .send_json(Method::PATCH, "/repos/octo/hello", Some(&owner), &update)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["visibility"], "public");
}

#[tokio::test]
async fn test_worker_registration_flow() {
    let app = spawn_app(StubScm::default()).await;
    let root = app.user_token("root").await;

    let response = app
        .post("/admin/workers/worker-1/register-token", Some(&root), &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let register = body["token"].as_str().unwrap().to_string();

    // a registration token only registers its own hostname
    let response = app
        .post("/workers", Some(&register), &json!({ "hostname": "worker-2" }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post("/workers", Some(&register), &json!({ "hostname": "worker-1" }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["worker"]["hostname"], "worker-1");
    let auth = body["token"].as_str().unwrap().to_string();
    assert_eq!(app.tokens.parse(&auth).unwrap().kind(), TokenKind::WorkerAuth);

    let response = app
        .post("/workers/worker-1/refresh", Some(&auth), &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/workers/worker-2/refresh", Some(&auth), &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_cannot_mint_registration_token() {
    let app = spawn_app(StubScm::default()).await;

    let alice = app.user_token("alice").await;
    let response = app
        .post("/admin/workers/worker-1/register-token", Some(&alice), &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_build_token_lifecycle() {
    let app = spawn_app(StubScm::default()).await;
    let register = app.mint(&MintTokenOpts::worker_register("worker-1"));
    let auth = app.mint(&MintTokenOpts::worker_auth("worker-1"));

    // registration tokens are not enough to claim a build
    let response = app.get("/repos/octo/hello/builds/1/token", Some(&register)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/repos/octo/hello/builds/1/token", Some(&auth)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let build_token = body["token"].as_str().unwrap().to_string();

    let claims = app.tokens.parse(&build_token).unwrap();
    assert_eq!(claims.kind(), TokenKind::WorkerBuildToken);
    assert_eq!(claims.build_id(), Some(1));
    assert_eq!(claims.repo_full_name(), Some("octo/hello"));

    // the build token reads its own build on a private repo
    let response = app.get("/repos/octo/hello/builds/1", Some(&build_token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // but not a sibling build
    let response = app.get("/repos/octo/hello/builds/2", Some(&build_token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = app
        .send_json(
            Method::PUT,
            "/repos/octo/hello/builds/2",
            Some(&build_token),
            &json!({ "status": "success" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // id request tokens need a running build
    let response = app
        .get("/repos/octo/hello/builds/1/id_request_token", Some(&build_token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send_json(
            Method::PUT,
            "/repos/octo/hello/builds/1",
            Some(&build_token),
            &json!({ "status": "running" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["host"], "worker-1");

    let response = app
        .get("/repos/octo/hello/builds/1/id_request_token", Some(&build_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let id_request = app.tokens.parse(body["token"].as_str().unwrap()).unwrap();
    assert_eq!(id_request.kind(), TokenKind::IdRequestToken);
    assert_eq!(id_request.build_id(), Some(1));
}

#[tokio::test]
async fn test_build_token_rejected_for_other_host() {
    let app = spawn_app(StubScm::default()).await;
    let build_token = app.mint(&build_token_opts(2));

    // build 2 is claimed by worker-1 once the build token updates it
    let response = app
        .send_json(
            Method::PUT,
            "/repos/octo/hello/builds/2",
            Some(&build_token),
            &json!({ "status": "running" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let other = app.mint(&MintTokenOpts::worker_auth("worker-9"));
    let response = app.get("/repos/octo/hello/builds/2/token", Some(&other)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_finished_build_gets_no_token() {
    let app = spawn_app(StubScm::default()).await;
    app.store
        .update_build(1, BuildStatus::Success, None)
        .await
        .unwrap();

    let auth = app.mint(&MintTokenOpts::worker_auth("worker-1"));
    let response = app.get("/repos/octo/hello/builds/1/token", Some(&auth)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_org_secret_creation_requires_org_admin() {
    let scm = StubScm::default()
        .org_level("alice", AccessLevel::Write)
        .org_level("bob", AccessLevel::Admin)
        .org_id("octo", "100");
    let app = spawn_app(scm).await;
    let request = json!({ "name": "deploy-key", "value": "s3cr3t" });

    let alice = app.user_token("alice").await;
    let response = app
        .post("/secrets/native/org/octo/*", Some(&alice), &request)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bob = app.user_token("bob").await;
    let response = app
        .post("/secrets/native/org/octo/*", Some(&bob), &request)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["org_scm_id"], "100");
    assert!(body.get("value").is_none());

    // duplicate
    let response = app
        .post("/secrets/native/org/octo/*", Some(&bob), &request)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get("/secrets/native/org/octo/*/deploy-key", Some(&bob))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_org_secret_denied_after_org_recreated() {
    let mut seed = seed();
    seed.secrets.push(org_secret(1, "deploy-key", "999"));
    let scm = StubScm::default()
        .org_level("bob", AccessLevel::Admin)
        .org_id("octo", "100");
    let app = spawn_app_with_seed(scm, seed).await;

    let bob = app.user_token("bob").await;
    let response = app
        .get("/secrets/native/org/octo/*/deploy-key", Some(&bob))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_repo_secret_creation_captures_scm_ids() {
    let scm = StubScm::default()
        .repo_level("bob-token", AccessLevel::Admin)
        .repo("octo", "hello", "200", "100");
    let app = spawn_app(scm).await;

    let bob = app.user_token("bob").await;
    let response = app
        .post(
            "/secrets/native/repo/octo/hello",
            Some(&bob),
            &json!({ "name": "npm-token", "value": "abc" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["org_scm_id"], "100");
    assert_eq!(body["repo_scm_id"], "200");

    let response = app
        .send_json(
            Method::PUT,
            "/secrets/native/repo/octo/hello/npm-token",
            Some(&bob),
            &json!({ "value": "def" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_team_secret_requires_team_admin() {
    let scm = StubScm::default()
        .org_id("octo", "100")
        .user_teams("alice", vec![team("300", "ops")])
        .user_teams("bob", vec![team("300", "ops")])
        .team_level("bob", "300", AccessLevel::Admin);
    let app = spawn_app(scm).await;
    let request = json!({ "name": "pager-key", "value": "xyz" });

    let alice = app.user_token("alice").await;
    let response = app
        .post("/secrets/native/team/octo/ops", Some(&alice), &request)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bob = app.user_token("bob").await;
    let response = app
        .post("/secrets/native/team/octo/ops", Some(&bob), &request)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["team_scm_id"], "300");

    // team members may list across the org
    let response = app.get("/secrets/native/team/octo/*", Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_secret_type_is_bad_request() {
    let app = spawn_app(StubScm::default()).await;

    let root = app.user_token("root").await;
    let response = app.get("/secrets/native/global/octo/*", Some(&root)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_named_secret_is_not_found() {
    let app = spawn_app(StubScm::default()).await;

    let root = app.user_token("root").await;
    let response = app
        .get("/secrets/native/org/octo/*/nope", Some(&root))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_build_token_reads_only_its_own_org_secrets() {
    let mut seed = seed();
    seed.secrets.push(org_secret(1, "deploy-key", "100"));
    seed.secrets.push(org_secret(2, "foreign-key", "555"));
    let app = spawn_app_with_seed(StubScm::default(), seed).await;
    let build_token = app.mint(&build_token_opts(2));

    let response = app
        .get("/secrets/native/org/octo/*/deploy-key", Some(&build_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "deploy-key");
    assert_eq!(body["value"], "s3cr3t");

    // users see metadata only
    let root = app.user_token("root").await;
    let response = app
        .get("/secrets/native/org/octo/*/deploy-key", Some(&root))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "deploy-key");
    assert!(body.get("value").is_none());

    let response = app
        .get("/secrets/native/org/octo/*/foreign-key", Some(&build_token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send_json(
            Method::PUT,
            "/secrets/native/org/octo/*/deploy-key",
            Some(&build_token),
            &json!({ "value": "overwritten" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_worker_token_cannot_read_repo() {
    let app = spawn_app(StubScm::default()).await;

    let auth = app.mint(&MintTokenOpts::worker_auth("worker-1"));
    let response = app.get("/repos/octo/hello", Some(&auth)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
