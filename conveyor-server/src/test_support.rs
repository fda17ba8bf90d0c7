//! Shared fixtures for in-crate tests

use async_trait::async_trait;
use conveyor_core::{
    scm_error, AccessLevel, ConveyorConfig, ConveyorResult, ScmRepo, ScmTeam, User,
};
use conveyor_scm::ScmClient;
use std::sync::Arc;

use crate::{AppState, MemoryStore};

/// SCM that is never reachable
pub(crate) struct OfflineScm;

#[async_trait]
impl ScmClient for OfflineScm {
    async fn repo_access(&self, _: &str, _: &str, _: &str, _: &str) -> ConveyorResult<AccessLevel> {
        Err(scm_error!("offline", "offline_scm"))
    }

    async fn org_access(&self, _: &User, _: &str) -> ConveyorResult<AccessLevel> {
        Err(scm_error!("offline", "offline_scm"))
    }

    async fn team_access(
        &self,
        _: &User,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
    ) -> ConveyorResult<AccessLevel> {
        Err(scm_error!("offline", "offline_scm"))
    }

    async fn get_org_identifiers(&self, _: &User, _: &str) -> ConveyorResult<(String, String)> {
        Err(scm_error!("offline", "offline_scm"))
    }

    async fn get_repo(&self, _: &User, _: &str, _: &str) -> ConveyorResult<ScmRepo> {
        Err(scm_error!("offline", "offline_scm"))
    }

    async fn list_users_teams_for_org(&self, _: &User, _: &str) -> ConveyorResult<Vec<ScmTeam>> {
        Err(scm_error!("offline", "offline_scm"))
    }
}

pub(crate) fn config() -> ConveyorConfig {
    let mut config = ConveyorConfig::default();
    config.auth.access_secret = "access".to_string();
    config.auth.refresh_secret = "refresh".to_string();
    config.auth.worker_secret = "worker".to_string();
    config
}

pub(crate) fn state() -> AppState {
    AppState::new(config(), Arc::new(MemoryStore::new()), Arc::new(OfflineScm))
}
