//! GitHub REST client implementation

use async_trait::async_trait;
use conveyor_core::{
    AccessLevel, ConveyorError, ConveyorResult, ErrorContext, ScmConfig, ScmRepo, ScmTeam, User,
    Visibility,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::{create_http_client, response_error, ScmClient};

const TEAMS_PAGE_SIZE: usize = 100;
const TEAMS_MAX_PAGES: usize = 10;

/// GitHub API client
pub struct GitHubScmClient {
    client: reqwest::Client,
    config: ScmConfig,
}

/// Response of `GET /repos/{org}/{repo}/collaborators/{user}/permission`
#[derive(Debug, Deserialize)]
pub(crate) struct GitHubPermission {
    pub permission: String,
}

/// Response of `GET /orgs/{org}/memberships/{user}` and team memberships
#[derive(Debug, Deserialize)]
pub(crate) struct GitHubMembership {
    pub role: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitHubAccount {
    pub login: String,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitHubRepository {
    pub id: u64,
    pub name: String,
    pub owner: GitHubAccount,
    pub private: bool,
    pub visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitHubTeam {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub organization: GitHubAccount,
}

impl GitHubScmClient {
    /// Create a new GitHub API client
    pub fn new(config: ScmConfig) -> ConveyorResult<Self> {
        let client = create_http_client(&config)?;

        info!("Created GitHub SCM client for {}", config.base_url);

        Ok(Self { client, config })
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Make an authenticated GET request and decode the JSON body
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        token: &str,
        operation: &str,
    ) -> ConveyorResult<T> {
        let url = self.endpoint_url(endpoint);

        debug!(operation = operation, "Making GitHub API request to: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ConveyorError::Scm {
                message: format!("Failed to make request to GitHub API: {}", e),
                status: None,
                source: Some(Box::new(e)),
                context: ErrorContext::new("github_scm_client").with_operation(operation),
            })?;

        if !response.status().is_success() {
            return Err(response_error(&response, operation));
        }

        response.json::<T>().await.map_err(|e| ConveyorError::Scm {
            message: format!("Failed to parse GitHub response: {}", e),
            status: None,
            source: Some(Box::new(e)),
            context: ErrorContext::new("github_scm_client").with_operation(operation),
        })
    }
}

/// Org memberships: active admins are admin, active members read
pub(crate) fn org_membership_level(membership: &GitHubMembership) -> AccessLevel {
    if membership.state != "active" {
        return AccessLevel::None;
    }
    match membership.role.as_str() {
        "admin" => AccessLevel::Admin,
        "member" => AccessLevel::Read,
        _ => AccessLevel::None,
    }
}

/// Team memberships: active maintainers are admin, active members read
pub(crate) fn team_membership_level(membership: &GitHubMembership) -> AccessLevel {
    if membership.state != "active" {
        return AccessLevel::None;
    }
    match membership.role.as_str() {
        "maintainer" => AccessLevel::Admin,
        "member" => AccessLevel::Read,
        _ => AccessLevel::None,
    }
}

pub(crate) fn repo_visibility(repo: &GitHubRepository) -> Visibility {
    match repo.visibility.as_deref() {
        Some("public") => Visibility::Public,
        Some("internal") => Visibility::Internal,
        Some("private") => Visibility::Private,
        _ if repo.private => Visibility::Private,
        _ => Visibility::Public,
    }
}

#[async_trait]
impl ScmClient for GitHubScmClient {
    async fn repo_access(
        &self,
        username: &str,
        token: &str,
        org: &str,
        repo: &str,
    ) -> ConveyorResult<AccessLevel> {
        debug!("Checking GitHub access for {} on {}/{}", username, org, repo);

        let endpoint = format!("repos/{}/{}/collaborators/{}/permission", org, repo, username);
        let permission: GitHubPermission = self.get_json(&endpoint, token, "repo_access").await?;

        Ok(AccessLevel::from_scm(&permission.permission))
    }

    async fn org_access(&self, user: &User, org: &str) -> ConveyorResult<AccessLevel> {
        // a user's personal namespace is theirs to administer
        if user.name.eq_ignore_ascii_case(org) {
            return Ok(AccessLevel::Admin);
        }

        let endpoint = format!("orgs/{}/memberships/{}", org, user.name);
        let membership: GitHubMembership =
            self.get_json(&endpoint, &user.token, "org_access").await?;

        Ok(org_membership_level(&membership))
    }

    async fn team_access(
        &self,
        user: &User,
        org: &str,
        team: &str,
        org_id: &str,
        team_id: &str,
    ) -> ConveyorResult<AccessLevel> {
        debug!(
            "Checking GitHub team access for {} on {}/{} ({}/{})",
            user.name, org, team, org_id, team_id
        );

        // addressed by identifier so a renamed or recreated team never matches
        let endpoint = format!(
            "organizations/{}/team/{}/memberships/{}",
            org_id, team_id, user.name
        );
        let membership: GitHubMembership =
            self.get_json(&endpoint, &user.token, "team_access").await?;

        Ok(team_membership_level(&membership))
    }

    async fn get_org_identifiers(
        &self,
        user: &User,
        org: &str,
    ) -> ConveyorResult<(String, String)> {
        let account: GitHubAccount = match self
            .get_json(&format!("orgs/{}", org), &user.token, "get_org_identifiers")
            .await
        {
            Ok(account) => account,
            // personal namespaces are users, not orgs
            Err(e) if e.is_not_found() && user.name.eq_ignore_ascii_case(org) => {
                self.get_json(&format!("users/{}", org), &user.token, "get_org_identifiers")
                    .await?
            }
            Err(e) => return Err(e),
        };

        Ok((account.login, account.id.to_string()))
    }

    async fn get_repo(&self, user: &User, org: &str, name: &str) -> ConveyorResult<ScmRepo> {
        let endpoint = format!("repos/{}/{}", org, name);
        let repo: GitHubRepository = self.get_json(&endpoint, &user.token, "get_repo").await?;

        Ok(ScmRepo {
            id: repo.id.to_string(),
            visibility: repo_visibility(&repo),
            org: repo.owner.login,
            org_id: repo.owner.id.to_string(),
            name: repo.name,
        })
    }

    async fn list_users_teams_for_org(
        &self,
        user: &User,
        org: &str,
    ) -> ConveyorResult<Vec<ScmTeam>> {
        let mut teams = Vec::new();

        for page in 1..=TEAMS_MAX_PAGES {
            let endpoint = format!("user/teams?per_page={}&page={}", TEAMS_PAGE_SIZE, page);
            let batch: Vec<GitHubTeam> = self
                .get_json(&endpoint, &user.token, "list_users_teams_for_org")
                .await?;
            let exhausted = batch.len() < TEAMS_PAGE_SIZE;

            teams.extend(
                batch
                    .into_iter()
                    .filter(|team| team.organization.login.eq_ignore_ascii_case(org))
                    .map(|team| ScmTeam {
                        id: team.id.to_string(),
                        name: team.name,
                        slug: team.slug,
                    }),
            );

            if exhausted {
                break;
            }
        }

        debug!("User {} belongs to {} teams in {}", user.name, teams.len(), org);
        Ok(teams)
    }
}
