//! Publish service: turns a post into a commit and hands the commit to deployment tracking.
use chrono::Utc;
use reqwest::Url;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::CredentialProvider;
use crate::deploy::{spawn_tracking, DeploymentPoller, TrackingHandle};
use crate::error::{FieldViolation, PublishError};
use crate::frontmatter::{render_post, resolve_target_path, validate_post, validate_target_path};
use crate::github::{ContentApi, FileWrite};
use crate::model::{CommitInfo, PostData, PublishConfig, PublishStage, RepoRef};
use crate::status::PublishStatusStore;

/// Knobs taken from the `app` and `github` config sections.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub posts_dir: String,
    pub default_branch: Option<String>,
    pub track_deployments: bool,
    pub deploy_timeout: Duration,
    pub web_base: Url,
}

/// What a successful publish produced.
#[derive(Debug)]
pub struct PublishOutcome {
    pub session_id: Uuid,
    pub path: String,
    /// `true` when the file did not exist before this publish.
    pub created: bool,
    pub commit: CommitInfo,
    /// Present when deployment tracking was started for this commit.
    pub tracking: Option<TrackingHandle>,
}

pub struct PublishService {
    content: Arc<dyn ContentApi>,
    poller: DeploymentPoller,
    credentials: Arc<dyn CredentialProvider>,
    repo: Option<RepoRef>,
    store: PublishStatusStore,
    settings: PublishSettings,
    slot: Arc<Mutex<()>>,
    tracking: StdMutex<Option<CancellationToken>>,
}

impl PublishService {
    pub fn new(
        content: Arc<dyn ContentApi>,
        poller: DeploymentPoller,
        credentials: Arc<dyn CredentialProvider>,
        repo: Option<RepoRef>,
        store: PublishStatusStore,
        settings: PublishSettings,
    ) -> Self {
        Self {
            content,
            poller,
            credentials,
            repo,
            store,
            settings,
            slot: Arc::new(Mutex::new(())),
            tracking: StdMutex::new(None),
        }
    }

    pub fn store(&self) -> &PublishStatusStore {
        &self.store
    }

    pub fn is_publishing(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Publish `post` as one commit.
    ///
    /// Only one publish runs at a time; a concurrent call gets `AlreadyPublishing` without
    /// touching the network or the status store. Missing credentials or repository fail
    /// before the store is touched as well.
    pub async fn publish_post(&self, post: &PostData, config: &PublishConfig) -> Result<PublishOutcome, PublishError> {
        let _slot = self
            .slot
            .clone()
            .try_lock_owned()
            .map_err(|_| PublishError::AlreadyPublishing)?;

        match self.credentials.bearer_token().await? {
            Some(_) => {}
            None => return Err(PublishError::AuthRequired),
        }
        let repo = self.repo.clone().ok_or(PublishError::NoRepositorySelected)?;

        // The previous commit's poller must not write into this session.
        self.stop_tracking();
        let session_id = Uuid::new_v4();
        self.store.set_publishing(true);
        let result = self.run(session_id, &repo, post, config).await;
        if let Err(err) = &result {
            warn!(%session_id, %err, "publish failed");
            self.store
                .update_stage(PublishStage::Failed, "Publish failed", None, Some(err.to_string()));
        }
        self.store.set_publishing(false);
        result
    }

    #[instrument(skip_all, fields(session = %session_id, repo = %repo))]
    async fn run(
        &self,
        session_id: Uuid,
        repo: &RepoRef,
        post: &PostData,
        config: &PublishConfig,
    ) -> Result<PublishOutcome, PublishError> {
        self.enter(PublishStage::Preparing, "Preparing post");
        let path = resolve_target_path(post, config, &self.settings.posts_dir);
        let branch = config
            .branch
            .clone()
            .or_else(|| self.settings.default_branch.clone());

        self.enter(PublishStage::Validating, "Validating metadata");
        let mut violations = validate_post(post).err().unwrap_or_default();
        if let Err(violation) = validate_target_path(config) {
            violations.push(violation);
        }
        if !violations.is_empty() {
            return Err(PublishError::Validation(violations));
        }

        self.enter(PublishStage::Committing, "Preparing commit");
        let file = render_post(post, Utc::now())
            .map_err(|e| PublishError::Validation(vec![FieldViolation::new("metadata", e.to_string())]))?;
        let existing_sha = self
            .content
            .get_file_sha(repo, &path, branch.as_deref())
            .await?;
        let created = existing_sha.is_none();
        let message = if config.message.trim().is_empty() {
            format!("Publish post: {}", post.title.trim())
        } else {
            config.message.trim().to_string()
        };

        self.enter(PublishStage::Pushing, if created { "Creating post" } else { "Updating post" });
        let write = FileWrite {
            path: path.clone(),
            content: file,
            message,
            sha: existing_sha,
            branch,
        };
        let commit = self.content.create_or_update_file(repo, &write).await?;
        self.store.set_commit_url(commit.html_url.clone());
        info!(%path, commit = %commit.sha, created, "post committed");

        self.enter(PublishStage::Deploying, "Tracking deployment");
        let tracking = self.start_tracking(repo, &commit.sha);

        self.enter(PublishStage::Completed, "Published");
        Ok(PublishOutcome {
            session_id,
            path,
            created,
            commit,
            tracking,
        })
    }

    fn enter(&self, stage: PublishStage, message: &str) {
        self.store
            .update_stage(stage, message, stage.default_progress(), None);
    }

    fn start_tracking(&self, repo: &RepoRef, commit_sha: &str) -> Option<TrackingHandle> {
        if !self.settings.track_deployments {
            return None;
        }
        if self.store.snapshot().is_tracking {
            info!("deployment tracking already active; not starting another");
            return None;
        }
        if let Ok(url) = self
            .settings
            .web_base
            .join(&format!("{}/{}/actions", repo.owner, repo.name))
        {
            self.store.set_deployment_url(url.to_string());
        }
        let handle = spawn_tracking(
            self.poller.clone(),
            self.store.clone(),
            repo.clone(),
            commit_sha.to_string(),
            self.settings.deploy_timeout,
        );
        if let Ok(mut guard) = self.tracking.lock() {
            *guard = Some(handle.cancel_token());
        }
        Some(handle)
    }

    /// Stop the active deployment poller, if any.
    pub fn stop_tracking(&self) {
        let token = self.tracking.lock().ok().and_then(|mut guard| guard.take());
        if let Some(token) = token {
            token.cancel();
        }
        self.store.set_tracking(false);
    }

    /// Clear the status so the same post can be published again.
    pub fn retry_publish(&self) {
        self.store.reset();
    }
}
