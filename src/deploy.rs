//! Deployment poller: follows the CI run of a pushed commit.
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DeploymentTrackingError;
use crate::github::RunsApi;
use crate::model::{DeploymentStatus, RepoRef};
use crate::status::PublishStatusStore;

#[derive(Clone)]
pub struct DeploymentPoller {
    api: Arc<dyn RunsApi>,
    interval: Duration,
}

struct PollState {
    api: Arc<dyn RunsApi>,
    repo: RepoRef,
    commit_sha: String,
    interval: Duration,
    cancel: CancellationToken,
    first: bool,
    done: bool,
}

impl DeploymentPoller {
    pub fn new(api: Arc<dyn RunsApi>, interval: Duration) -> Self {
        Self { api, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One `DeploymentStatus` per tick that finds a run for the commit.
    ///
    /// The first query is immediate, later ones wait `interval`. The stream ends after a
    /// terminal status, after the first error, or once `cancel` fires; a response that
    /// arrives after cancellation is dropped.
    pub fn status_stream(
        &self,
        repo: RepoRef,
        commit_sha: String,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<DeploymentStatus, DeploymentTrackingError>> + Send + 'static {
        let state = PollState {
            api: Arc::clone(&self.api),
            repo,
            commit_sha,
            interval: self.interval,
            cancel,
            first: true,
            done: false,
        };
        stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            loop {
                if st.first {
                    st.first = false;
                } else {
                    tokio::select! {
                        _ = st.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(st.interval) => {}
                    }
                }
                if st.cancel.is_cancelled() {
                    return None;
                }

                let res = st.api.latest_run_for_commit(&st.repo, &st.commit_sha).await;
                if st.cancel.is_cancelled() {
                    debug!("discarding deployment status received after cancellation");
                    return None;
                }
                match res {
                    Ok(Some(status)) => {
                        st.done = status.is_terminal();
                        return Some((Ok(status), st));
                    }
                    Ok(None) => debug!(commit = %st.commit_sha, "no workflow run for commit yet"),
                    Err(err) => {
                        st.done = true;
                        return Some((Err(err.into()), st));
                    }
                }
            }
        })
    }

    /// Poll until a terminal status, `timeout`, or cancellation.
    ///
    /// Returns the terminal status, or the last one seen when time runs out.
    #[instrument(skip_all, fields(repo = %repo, commit = %commit_sha))]
    pub async fn poll_until<F>(
        &self,
        repo: &RepoRef,
        commit_sha: &str,
        mut on_update: F,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Option<DeploymentStatus>, DeploymentTrackingError>
    where
        F: FnMut(&DeploymentStatus) + Send,
    {
        let updates = self.status_stream(repo.clone(), commit_sha.to_string(), cancel.clone());
        tokio::pin!(updates);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut last: Option<DeploymentStatus> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    cancel.cancel();
                    info!(timeout_ms = timeout.as_millis() as u64, last = ?last.as_ref().map(|s| s.status.as_str()), "deployment tracking timed out");
                    return Ok(last);
                }
                item = updates.next() => match item {
                    Some(Ok(status)) => {
                        on_update(&status);
                        let terminal = status.is_terminal();
                        last = Some(status);
                        if terminal {
                            return Ok(last);
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Ok(last),
                }
            }
        }
    }

    /// Poll with a private cancellation token; stops on terminal status or timeout.
    pub async fn poll_deployment_status<F>(
        &self,
        repo: &RepoRef,
        commit_sha: &str,
        on_update: F,
        timeout: Duration,
    ) -> Result<Option<DeploymentStatus>, DeploymentTrackingError>
    where
        F: FnMut(&DeploymentStatus) + Send,
    {
        self.poll_until(repo, commit_sha, on_update, timeout, CancellationToken::new())
            .await
    }
}

/// Background deployment tracking started by a publish.
#[derive(Debug)]
pub struct TrackingHandle {
    cancel: CancellationToken,
    join: JoinHandle<Option<DeploymentStatus>>,
}

impl TrackingHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the tracking task; `None` when it timed out without a run, failed, or was stopped early.
    pub async fn finished(self) -> Option<DeploymentStatus> {
        match self.join.await {
            Ok(status) => status,
            Err(err) => {
                warn!(?err, "deployment tracking task panicked or was aborted");
                None
            }
        }
    }
}

/// Spawn a poll loop that mirrors every update into `store`.
///
/// Store writes are keyed by `commit_sha`, so a tracker that has been superseded
/// cannot touch a later publish's state. Errors are logged and swallowed; the publish outcome never depends on them.
pub fn spawn_tracking(
    poller: DeploymentPoller,
    store: PublishStatusStore,
    repo: RepoRef,
    commit_sha: String,
    timeout: Duration,
) -> TrackingHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    store.begin_tracking(&commit_sha);
    let join = tokio::spawn(async move {
        let updates = store.clone();
        let sha = commit_sha.clone();
        let outcome = poller
            .poll_until(
                &repo,
                &commit_sha,
                move |status| {
                    updates.apply_deployment(&sha, status.clone());
                },
                timeout,
                token,
            )
            .await;
        store.end_tracking(&commit_sha);
        match outcome {
            Ok(Some(status)) => {
                info!(
                    run_id = status.id,
                    status = status.status.as_str(),
                    conclusion = status.conclusion.as_ref().map(|c| c.as_str()).unwrap_or("none"),
                    "deployment tracking finished"
                );
                Some(status)
            }
            Ok(None) => {
                info!("deployment tracking ended without a workflow run");
                None
            }
            Err(err) => {
                warn!(%err, "deployment tracking failed; publish result unaffected");
                None
            }
        }
    });
    TrackingHandle { cancel, join }
}
