use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::auth::CredentialProvider;
use crate::error::ApiError;
use crate::model::{CommitInfo, DeploymentStatus, RepoRef};

pub mod app_auth;
pub mod model;
pub mod oauth;

use self::model::{
    ContentsEntry, PutContentsRequest, PutContentsResponse, RateLimit, RateLimitResponse, RepoAccess,
    RepositoryResponse, WorkflowRunsResponse,
};

pub const GITHUB_API_BASE: &str = "https://api.github.com/";
pub const GITHUB_API_VERSION: &str = "2022-11-28";
pub const USER_AGENT: &str = concat!("blog-publisher/", env!("CARGO_PKG_VERSION"));

const RUNS_PER_PAGE: u32 = 20;

/// A create-or-update of one file through the Contents API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    /// Raw file text; base64-encoded on the wire.
    pub content: String,
    pub message: String,
    /// Current blob SHA. Required by GitHub when the file already exists.
    pub sha: Option<String>,
    pub branch: Option<String>,
}

/// The Contents API calls the publish flow needs.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Blob SHA of `path`, or `None` when the file does not exist.
    async fn get_file_sha(&self, repo: &RepoRef, path: &str, branch: Option<&str>) -> Result<Option<String>, ApiError>;

    async fn create_or_update_file(&self, repo: &RepoRef, write: &FileWrite) -> Result<CommitInfo, ApiError>;

    async fn rate_limit(&self) -> Result<RateLimit, ApiError>;
}

/// Read access to the CI runs triggered by a commit.
#[async_trait]
pub trait RunsApi: Send + Sync {
    /// Latest workflow run for `commit_sha`, or `None` when CI has not picked it up yet.
    async fn latest_run_for_commit(&self, repo: &RepoRef, commit_sha: &str) -> Result<Option<DeploymentStatus>, ApiError>;
}

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Shared reqwest client settings for every GitHub endpoint.
pub(crate) fn http_client() -> Result<Client, ApiError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .no_proxy()
        .build()
        .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {}", e)))
}

impl GitHubClient {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self, ApiError> {
        let base_url = Url::parse(GITHUB_API_BASE).map_err(|e| ApiError::Network(e.to_string()))?;
        Self::with_base_url(base_url, credentials)
    }

    pub fn with_base_url(base_url: Url, credentials: Arc<dyn CredentialProvider>) -> Result<Self, ApiError> {
        Ok(Self {
            http: http_client()?,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Network(format!("invalid GitHub URL for {}: {}", path, e)))
    }

    /// Build an authenticated request with the standard GitHub headers.
    pub async fn build_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<reqwest::Request, ApiError> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .map_err(|e| ApiError::Credential(e.to_string()))?;
        let mut builder = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build GitHub request: {}", e)))
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, ApiError> {
        debug!(method=%request.method(), url=%request.url(), "sending github request");
        let res = self.http.execute(request).await?;
        if res.status().is_success() {
            return Ok(res);
        }
        Err(error_from_response(res).await)
    }

    #[instrument(skip_all, fields(repo = %repo, path = %path))]
    pub async fn get_file_sha(&self, repo: &RepoRef, path: &str, branch: Option<&str>) -> Result<Option<String>, ApiError> {
        let mut url = self.endpoint(&contents_path(repo, path))?;
        if let Some(branch) = branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        let request = self.build_request::<()>(Method::GET, url, None).await?;
        match self.execute(request).await {
            Ok(res) => {
                let entry: ContentsEntry = res.json().await?;
                if entry.typ != "file" {
                    warn!(typ = %entry.typ, "contents path is not a file");
                }
                Ok(Some(entry.sha))
            }
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, fields(repo = %repo, path = %write.path, update = write.sha.is_some()))]
    pub async fn create_or_update_file(&self, repo: &RepoRef, write: &FileWrite) -> Result<CommitInfo, ApiError> {
        let url = self.endpoint(&contents_path(repo, &write.path))?;
        let body = PutContentsRequest {
            message: &write.message,
            content: STANDARD.encode(write.content.as_bytes()),
            sha: write.sha.as_deref(),
            branch: write.branch.as_deref(),
        };
        let request = self.build_request(Method::PUT, url, Some(&body)).await?;
        let res = self.execute(request).await?;
        let payload: PutContentsResponse = res.json().await?;
        debug!(commit = %payload.commit.sha, "file committed");
        Ok(CommitInfo {
            sha: payload.commit.sha,
            html_url: payload.commit.html_url,
            content_sha: payload.content.map(|c| c.sha),
        })
    }

    #[instrument(skip_all, fields(repo = %repo, commit = %commit_sha))]
    pub async fn latest_run_for_commit(&self, repo: &RepoRef, commit_sha: &str) -> Result<Option<DeploymentStatus>, ApiError> {
        let mut url = self.endpoint(&format!("repos/{}/{}/actions/runs", repo.owner, repo.name))?;
        url.query_pairs_mut()
            .append_pair("head_sha", commit_sha)
            .append_pair("per_page", &RUNS_PER_PAGE.to_string());
        let request = self.build_request::<()>(Method::GET, url, None).await?;
        let res = self.execute(request).await?;
        let payload: WorkflowRunsResponse = res.json().await?;
        debug!(total = payload.total_count, "workflow runs for commit");
        Ok(payload
            .workflow_runs
            .into_iter()
            .filter(|run| run.head_sha == commit_sha)
            .max_by_key(|run| (run.created_at, run.id))
            .map(DeploymentStatus::from))
    }

    pub async fn rate_limit(&self) -> Result<RateLimit, ApiError> {
        let url = self.endpoint("rate_limit")?;
        let request = self.build_request::<()>(Method::GET, url, None).await?;
        let res = self.execute(request).await?;
        let payload: RateLimitResponse = res.json().await?;
        Ok(payload.resources.core)
    }

    /// Permissions of the current credential on `repo`.
    pub async fn repository_access(&self, repo: &RepoRef) -> Result<RepoAccess, ApiError> {
        let url = self.endpoint(&format!("repos/{}/{}", repo.owner, repo.name))?;
        let request = self.build_request::<()>(Method::GET, url, None).await?;
        let res = self.execute(request).await?;
        let payload: RepositoryResponse = res.json().await?;
        Ok(RepoAccess {
            full_name: payload.full_name,
            default_branch: payload.default_branch,
            permissions: payload.permissions.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ContentApi for GitHubClient {
    async fn get_file_sha(&self, repo: &RepoRef, path: &str, branch: Option<&str>) -> Result<Option<String>, ApiError> {
        GitHubClient::get_file_sha(self, repo, path, branch).await
    }

    async fn create_or_update_file(&self, repo: &RepoRef, write: &FileWrite) -> Result<CommitInfo, ApiError> {
        GitHubClient::create_or_update_file(self, repo, write).await
    }

    async fn rate_limit(&self) -> Result<RateLimit, ApiError> {
        GitHubClient::rate_limit(self).await
    }
}

#[async_trait]
impl RunsApi for GitHubClient {
    async fn latest_run_for_commit(&self, repo: &RepoRef, commit_sha: &str) -> Result<Option<DeploymentStatus>, ApiError> {
        GitHubClient::latest_run_for_commit(self, repo, commit_sha).await
    }
}

fn contents_path(repo: &RepoRef, path: &str) -> String {
    format!("repos/{}/{}/contents/{}", repo.owner, repo.name, path.trim_start_matches('/'))
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Turn a non-success response into an `ApiError`, consuming the body.
pub(crate) async fn error_from_response(res: reqwest::Response) -> ApiError {
    let status = res.status();
    let remaining = header_value::<u64>(res.headers(), "x-ratelimit-remaining");
    let reset = header_value::<i64>(res.headers(), "x-ratelimit-reset");
    let body = res.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS || remaining == Some(0) {
        warn!(%status, "rate limited by GitHub");
    } else {
        warn!(%status, %body, "GitHub API error");
    }
    ApiError::from_status(status.as_u16(), body, remaining, reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use serde_json::json;

    fn client() -> GitHubClient {
        GitHubClient::new(Arc::new(StaticToken::new("token"))).unwrap()
    }

    #[tokio::test]
    async fn build_request_sets_headers() {
        let client = client();
        let url = client.endpoint("rate_limit").unwrap();
        let request = client
            .build_request(Method::PUT, url, Some(&json!({ "sample": true })))
            .await
            .unwrap();
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.url().path(), "/rate_limit");
        let headers = request.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()).unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers.get("X-GitHub-Api-Version").and_then(|h| h.to_str().ok()).unwrap(),
            GITHUB_API_VERSION
        );
        assert_eq!(
            headers.get("Accept").and_then(|h| h.to_str().ok()).unwrap(),
            "application/vnd.github+json"
        );
    }

    #[tokio::test]
    async fn build_request_without_credential_omits_authorization() {
        let client = GitHubClient::new(Arc::new(StaticToken::none())).unwrap();
        let url = client.endpoint("rate_limit").unwrap();
        let request = client.build_request::<()>(Method::GET, url, None).await.unwrap();
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn contents_path_strips_leading_slash() {
        let repo = RepoRef::new("octocat", "blog");
        assert_eq!(
            contents_path(&repo, "/content/posts/hello.md"),
            "repos/octocat/blog/contents/content/posts/hello.md"
        );
    }

    #[test]
    fn put_body_omits_absent_sha_and_branch() {
        let body = PutContentsRequest {
            message: "first post",
            content: STANDARD.encode("hi"),
            sha: None,
            branch: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["content"], "aGk=");
        assert!(value.get("sha").is_none());
        assert!(value.get("branch").is_none());
    }
}
