//! Wire shapes of the GitHub REST responses this crate reads.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DeploymentStatus, RunConclusion, RunStatus};

#[derive(Deserialize, Debug)]
pub struct ContentsEntry {
    pub sha: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Serialize, Debug)]
pub struct PutContentsRequest<'a> {
    pub message: &'a str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<&'a str>,
}

#[derive(Deserialize, Debug)]
pub struct PutContentsResponse {
    pub content: Option<ContentsEntry>,
    pub commit: CommitRef,
}

#[derive(Deserialize, Debug)]
pub struct CommitRef {
    pub sha: String,
    pub html_url: String,
}

#[derive(Deserialize, Debug)]
pub struct WorkflowRunsResponse {
    pub total_count: u64,
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub head_sha: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowRun> for DeploymentStatus {
    fn from(run: WorkflowRun) -> Self {
        DeploymentStatus {
            id: run.id,
            name: run.name,
            head_sha: run.head_sha,
            status: run.status,
            conclusion: run.conclusion,
            html_url: run.html_url,
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Deserialize, Debug)]
pub struct RateLimitResources {
    pub core: RateLimit,
}

/// Core REST quota as reported by `GET /rate_limit`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
    #[serde(default)]
    pub used: u64,
}

#[derive(Deserialize, Debug)]
pub struct RepositoryResponse {
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub permissions: Option<RepoPermissions>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

/// What the authenticated identity may do on the target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoAccess {
    pub full_name: String,
    pub default_branch: String,
    pub permissions: RepoPermissions,
}

impl RepoAccess {
    pub fn can_publish(&self) -> bool {
        self.permissions.push || self.permissions.admin
    }
}

#[derive(Deserialize, Debug)]
pub struct InstallationTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// Body of `login/oauth/access_token`; GitHub answers 200 for both outcomes.
#[derive(Deserialize, Debug)]
pub struct AccessTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub interval: Option<u64>,
}
