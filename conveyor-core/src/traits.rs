//! Core trait definitions

use crate::error::ConveyorResult;
use crate::types::*;
use async_trait::async_trait;

/// Read-only storage lookups consumed by resource establishers and guards.
///
/// Missing records are reported as [`crate::ConveyorError::NotFound`]; every
/// other failure is a storage error.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Look up a user by name
    async fn get_user(&self, name: &str) -> ConveyorResult<User>;

    /// Look up a repository by org and repo name
    async fn get_repo_for_org(&self, org: &str, name: &str) -> ConveyorResult<Repo>;

    /// Look up a repository by its platform ID
    async fn get_repo(&self, id: i64) -> ConveyorResult<Repo>;

    /// Look up a build by its global ID
    async fn get_build(&self, id: i64) -> ConveyorResult<Build>;

    /// Look up a build by its number within a repository
    async fn get_build_for_repo(&self, repo: &Repo, number: i64) -> ConveyorResult<Build>;

    /// Look up a secret by engine, type, org, repo/team name and secret name
    async fn get_secret(
        &self,
        engine: &str,
        secret_type: SecretType,
        org: &str,
        name: &str,
        path: &str,
    ) -> ConveyorResult<Secret>;

    /// Platform settings
    async fn get_settings(&self) -> ConveyorResult<Settings>;
}
