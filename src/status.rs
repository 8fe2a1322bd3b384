//! Observable publish/deployment state shared by the publisher, the poller and the UI.
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{DeploymentStatus, PublishStage, PublishStatus};

/// Everything an observer needs to render publish progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSnapshot {
    pub is_publishing: bool,
    pub status: Option<PublishStatus>,
    pub deployment: Option<DeploymentStatus>,
    pub is_tracking: bool,
    /// Commit whose deployment the active tracker follows.
    pub tracking_commit: Option<String>,
}

/// Single-instance store; cloning shares the same state.
///
/// Writes are synchronous and every subscriber sees the latest snapshot.
#[derive(Debug, Clone)]
pub struct PublishStatusStore {
    tx: Arc<watch::Sender<PublishSnapshot>>,
}

impl Default for PublishStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishStatusStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PublishSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PublishSnapshot {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> Option<PublishStatus> {
        self.tx.borrow().status.clone()
    }

    /// Turning publishing on starts from a fresh initial status.
    pub fn set_publishing(&self, publishing: bool) {
        self.tx.send_modify(|s| {
            s.is_publishing = publishing;
            if publishing {
                s.status = Some(PublishStatus::initial());
                s.deployment = None;
            }
        });
    }

    /// Replace the whole status. Rejects a stage regression; returns whether it applied.
    pub fn set_status(&self, status: PublishStatus) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|s| {
            if let Some(current) = &s.status {
                if !allowed(current.stage, status.stage) {
                    warn!(from = %current.stage, to = %status.stage, "rejected publish stage regression");
                    return false;
                }
            }
            s.status = Some(status);
            applied = true;
            true
        });
        applied
    }

    /// Merge a stage transition into the current status.
    ///
    /// `progress: None` keeps the current progress. `error` is only kept for `Failed`.
    pub fn update_stage(&self, stage: PublishStage, message: impl Into<String>, progress: Option<u8>, error: Option<String>) -> bool {
        let message = message.into();
        let mut applied = false;
        self.tx.send_if_modified(|s| {
            let current = s.status.get_or_insert_with(PublishStatus::initial);
            if !allowed(current.stage, stage) {
                warn!(from = %current.stage, to = %stage, "rejected publish stage regression");
                return false;
            }
            current.stage = stage;
            current.message = message;
            if let Some(p) = progress {
                current.progress = p.min(100);
            }
            current.error = if stage == PublishStage::Failed { error } else { None };
            applied = true;
            true
        });
        applied
    }

    pub fn set_commit_url(&self, url: impl Into<String>) {
        let url = url.into();
        self.tx.send_modify(|s| {
            s.status.get_or_insert_with(PublishStatus::initial).commit_url = Some(url);
        });
    }

    pub fn set_deployment_url(&self, url: impl Into<String>) {
        let url = url.into();
        self.tx.send_modify(|s| {
            s.status.get_or_insert_with(PublishStatus::initial).deployment_url = Some(url);
        });
    }

    pub fn set_deployment_status(&self, deployment: Option<DeploymentStatus>) {
        self.tx.send_modify(|s| s.deployment = deployment);
    }

    /// Turning tracking off also forgets which commit held it.
    pub fn set_tracking(&self, tracking: bool) {
        self.tx.send_modify(|s| {
            s.is_tracking = tracking;
            if !tracking {
                s.tracking_commit = None;
            }
        });
    }

    /// Hand deployment tracking to `commit_sha`; writes for any other commit are dropped.
    pub fn begin_tracking(&self, commit_sha: &str) {
        let sha = commit_sha.to_string();
        self.tx.send_modify(|s| {
            s.is_tracking = true;
            s.tracking_commit = Some(sha);
            s.deployment = None;
        });
    }

    /// Record a run observed for `commit_sha`. Ignored unless that commit is still tracked.
    pub fn apply_deployment(&self, commit_sha: &str, deployment: DeploymentStatus) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|s| {
            if s.tracking_commit.as_deref() != Some(commit_sha) {
                debug!(commit = commit_sha, tracked = ?s.tracking_commit, "dropping deployment update for a stale commit");
                return false;
            }
            s.status.get_or_insert_with(PublishStatus::initial).deployment_url = Some(deployment.html_url.clone());
            s.deployment = Some(deployment);
            applied = true;
            true
        });
        applied
    }

    /// Clear the tracking flag if it still belongs to `commit_sha`.
    pub fn end_tracking(&self, commit_sha: &str) -> bool {
        self.tx.send_if_modified(|s| {
            if s.tracking_commit.as_deref() != Some(commit_sha) {
                return false;
            }
            s.is_tracking = false;
            s.tracking_commit = None;
            true
        })
    }

    pub fn reset(&self) {
        self.tx.send_if_modified(|s| {
            if *s == PublishSnapshot::default() {
                return false;
            }
            *s = PublishSnapshot::default();
            true
        });
    }
}

fn allowed(from: PublishStage, to: PublishStage) -> bool {
    from == to || from.can_advance_to(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_publishing_resets_status() {
        let store = PublishStatusStore::new();
        store.set_publishing(true);
        store.update_stage(PublishStage::Pushing, "pushing", Some(70), None);
        store.set_publishing(false);
        store.set_publishing(true);
        let snap = store.snapshot();
        assert!(snap.is_publishing);
        assert_eq!(snap.status, Some(PublishStatus::initial()));
    }

    #[test]
    fn update_stage_rejects_regression() {
        let store = PublishStatusStore::new();
        store.set_publishing(true);
        assert!(store.update_stage(PublishStage::Committing, "c", Some(40), None));
        assert!(!store.update_stage(PublishStage::Validating, "v", Some(15), None));
        let status = store.status().unwrap();
        assert_eq!(status.stage, PublishStage::Committing);
        assert_eq!(status.progress, 40);
    }

    #[test]
    fn failure_keeps_progress_and_sets_error() {
        let store = PublishStatusStore::new();
        store.set_publishing(true);
        store.update_stage(PublishStage::Pushing, "p", Some(70), None);
        store.update_stage(PublishStage::Failed, "publish failed", None, Some("boom".into()));
        let status = store.status().unwrap();
        assert_eq!(status.stage, PublishStage::Failed);
        assert_eq!(status.progress, 70);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert!(!store.update_stage(PublishStage::Completed, "done", Some(100), None));
    }

    #[test]
    fn set_status_rejects_regression_but_allows_same_stage() {
        let store = PublishStatusStore::new();
        let mut status = PublishStatus::initial();
        status.stage = PublishStage::Completed;
        assert!(store.set_status(status.clone()));
        status.message = "still done".into();
        assert!(store.set_status(status.clone()));
        status.stage = PublishStage::Pushing;
        assert!(!store.set_status(status));
    }

    #[test]
    fn reset_is_idempotent() {
        let store = PublishStatusStore::new();
        let mut rx = store.subscribe();
        store.reset();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.snapshot(), PublishSnapshot::default());

        store.begin_tracking("abc");
        store.reset();
        store.reset();
        assert_eq!(store.snapshot(), PublishSnapshot::default());
    }

    fn run_for(sha: &str) -> DeploymentStatus {
        use chrono::{TimeZone, Utc};
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        DeploymentStatus {
            id: 1,
            name: None,
            head_sha: sha.into(),
            status: crate::model::RunStatus::InProgress,
            conclusion: None,
            html_url: format!("https://github.com/o/r/actions/runs/{}", sha),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn updates_for_an_untracked_commit_are_dropped() {
        let store = PublishStatusStore::new();
        store.set_publishing(true);
        store.begin_tracking("aaaa");
        assert!(store.apply_deployment("aaaa", run_for("aaaa")));

        store.begin_tracking("bbbb");
        assert_eq!(store.snapshot().deployment, None);
        assert!(!store.apply_deployment("aaaa", run_for("aaaa")));
        assert!(!store.end_tracking("aaaa"));

        let snap = store.snapshot();
        assert!(snap.is_tracking);
        assert_eq!(snap.tracking_commit.as_deref(), Some("bbbb"));
        assert_eq!(snap.deployment, None);

        assert!(store.apply_deployment("bbbb", run_for("bbbb")));
        assert!(store.end_tracking("bbbb"));
        let snap = store.snapshot();
        assert!(!snap.is_tracking);
        assert_eq!(snap.deployment.map(|d| d.head_sha).as_deref(), Some("bbbb"));
    }

    #[test]
    fn set_tracking_off_detaches_the_commit() {
        let store = PublishStatusStore::new();
        store.begin_tracking("aaaa");
        store.set_deployment_status(Some(run_for("aaaa")));
        store.set_tracking(false);
        assert!(store.snapshot().deployment.is_some());
        store.set_deployment_status(None);
        assert_eq!(store.snapshot().deployment, None);
        assert!(!store.snapshot().is_tracking);
        assert!(!store.apply_deployment("aaaa", run_for("aaaa")));
        assert!(!store.end_tracking("aaaa"));
    }

    #[test]
    fn observers_see_changes_immediately() {
        let store = PublishStatusStore::new();
        let mut rx = store.subscribe();
        store.set_publishing(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_publishing);
        store.set_commit_url("https://github.com/o/r/commit/abc");
        assert_eq!(
            rx.borrow_and_update().status.as_ref().unwrap().commit_url.as_deref(),
            Some("https://github.com/o/r/commit/abc")
        );
    }
}
