//! Source-control provider clients
//!
//! The control plane consumes a narrow slice of the SCM: access-level checks
//! for users on orgs, repos and teams, and identifier lookups used to detect
//! drift between stored records and the live SCM entity.

use async_trait::async_trait;
use conveyor_core::{
    AccessLevel, ConveyorError, ConveyorResult, ErrorContext, ScmConfig, ScmRepo, ScmTeam, User,
};

pub mod github;


pub use github::GitHubScmClient;

/// Operations the auth core needs from the SCM.
///
/// Every call is a blocking network round trip; callers bound them with a
/// deadline and drop the future to cancel.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Access level of `username` on `org/repo`, queried with `token`.
    /// `token` may belong to someone other than `username` (owner fallback).
    async fn repo_access(
        &self,
        username: &str,
        token: &str,
        org: &str,
        repo: &str,
    ) -> ConveyorResult<AccessLevel>;

    /// Access level of `user` on `org`
    async fn org_access(&self, user: &User, org: &str) -> ConveyorResult<AccessLevel>;

    /// Access level of `user` on the team identified by `org_id`/`team_id`
    async fn team_access(
        &self,
        user: &User,
        org: &str,
        team: &str,
        org_id: &str,
        team_id: &str,
    ) -> ConveyorResult<AccessLevel>;

    /// Live `(name, id)` of an org
    async fn get_org_identifiers(&self, user: &User, org: &str)
        -> ConveyorResult<(String, String)>;

    /// Live view of a repository; a provider 404 surfaces as an SCM error
    /// with status 404
    async fn get_repo(&self, user: &User, org: &str, name: &str) -> ConveyorResult<ScmRepo>;

    /// Teams in `org` that `user` belongs to
    async fn list_users_teams_for_org(&self, user: &User, org: &str)
        -> ConveyorResult<Vec<ScmTeam>>;
}

/// Helper function to create HTTP client with common configuration
pub(crate) fn create_http_client(config: &ScmConfig) -> ConveyorResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            ConveyorError::Scm {
                message: format!("Invalid user agent: {}", e),
                status: None,
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );

    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(config.timeout_ms))
        .default_headers(headers)
        .build()
        .map_err(|e| ConveyorError::Scm {
            message: format!("Failed to create HTTP client: {}", e),
            status: None,
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

/// Helper function to turn a non-success response into an SCM error.
/// The response body is kept out of the message; provider bodies can echo
/// request details.
pub(crate) fn response_error(response: &reqwest::Response, operation: &str) -> ConveyorError {
    let status = response.status();

    ConveyorError::Scm {
        message: format!(
            "HTTP {} from SCM during {}: {}",
            status.as_u16(),
            operation,
            status.canonical_reason().unwrap_or("Unknown error")
        ),
        status: Some(status.as_u16()),
        source: None,
        context: ErrorContext::new("scm_client")
            .with_operation(operation)
            .with_metadata("path", response.url().path()),
    }
}
