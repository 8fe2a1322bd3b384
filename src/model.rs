use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured front matter carried by a post.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub draft: bool,
}

/// The content handed to a publish operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostData {
    pub title: String,
    pub content: String,
    pub metadata: PostMetadata,
}

impl PostData {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            metadata: PostMetadata::default(),
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.metadata.slug = Some(slug.into());
        self
    }

    /// Slug used for the target file: the explicit one, or one derived from the title.
    pub fn target_slug(&self) -> String {
        match self.metadata.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => slugify(&self.title),
        }
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Commit parameters for one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishConfig {
    pub message: String,
    pub branch: Option<String>,
    pub path: Option<String>,
}

impl PublishConfig {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Preparing,
    Validating,
    Committing,
    Pushing,
    Deploying,
    Completed,
    Failed,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStage::Preparing => "preparing",
            PublishStage::Validating => "validating",
            PublishStage::Committing => "committing",
            PublishStage::Pushing => "pushing",
            PublishStage::Deploying => "deploying",
            PublishStage::Completed => "completed",
            PublishStage::Failed => "failed",
        }
    }

    pub fn parse_stage(s: &str) -> Option<Self> {
        match s {
            "preparing" => Some(PublishStage::Preparing),
            "validating" => Some(PublishStage::Validating),
            "committing" => Some(PublishStage::Committing),
            "pushing" => Some(PublishStage::Pushing),
            "deploying" => Some(PublishStage::Deploying),
            "completed" => Some(PublishStage::Completed),
            "failed" => Some(PublishStage::Failed),
            _ => None,
        }
    }

    /// Position in the forward sequence. `Failed` sits outside it.
    pub fn rank(&self) -> Option<u8> {
        match self {
            PublishStage::Preparing => Some(0),
            PublishStage::Validating => Some(1),
            PublishStage::Committing => Some(2),
            PublishStage::Pushing => Some(3),
            PublishStage::Deploying => Some(4),
            PublishStage::Completed => Some(5),
            PublishStage::Failed => None,
        }
    }

    /// Progress percentage reported when entering the stage.
    pub fn default_progress(&self) -> Option<u8> {
        match self {
            PublishStage::Preparing => Some(0),
            PublishStage::Validating => Some(15),
            PublishStage::Committing => Some(40),
            PublishStage::Pushing => Some(70),
            PublishStage::Deploying => Some(85),
            PublishStage::Completed => Some(100),
            PublishStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishStage::Completed | PublishStage::Failed)
    }

    /// Whether moving from `self` to `next` keeps the stage machine moving forward.
    pub fn can_advance_to(&self, next: PublishStage) -> bool {
        if next == PublishStage::Failed {
            return *self != PublishStage::Failed;
        }
        match (self.rank(), next.rank()) {
            (Some(cur), Some(nxt)) => nxt >= cur,
            _ => false,
        }
    }
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishStatus {
    pub stage: PublishStage,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub commit_url: Option<String>,
    pub deployment_url: Option<String>,
}

impl PublishStatus {
    pub fn initial() -> Self {
        Self {
            stage: PublishStage::Preparing,
            progress: 0,
            message: String::new(),
            error: None,
            commit_url: None,
            deployment_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Waiting => "waiting",
            RunStatus::Requested => "requested",
            RunStatus::Pending => "pending",
            RunStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    Skipped,
    Neutral,
    ActionRequired,
    Stale,
    #[serde(other)]
    Unknown,
}

impl RunConclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::Skipped => "skipped",
            RunConclusion::Neutral => "neutral",
            RunConclusion::ActionRequired => "action_required",
            RunConclusion::Stale => "stale",
            RunConclusion::Unknown => "unknown",
        }
    }
}

/// Snapshot of the CI run deploying a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentStatus {
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

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        self.status == RunStatus::Completed || self.conclusion.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.conclusion == Some(RunConclusion::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Result of a successful create/update through the Contents API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub html_url: String,
    pub content_sha: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust   2024 -- notes "), "rust-2024-notes");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn target_slug_prefers_metadata() {
        let post = PostData::new("Some Title", "body").with_slug("custom");
        assert_eq!(post.target_slug(), "custom");
        let post = PostData::new("Some Title", "body");
        assert_eq!(post.target_slug(), "some-title");
    }

    #[test]
    fn stages_only_move_forward_or_fail() {
        use PublishStage::*;
        assert!(Preparing.can_advance_to(Validating));
        assert!(Pushing.can_advance_to(Pushing));
        assert!(!Pushing.can_advance_to(Committing));
        assert!(Committing.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
        assert!(!Failed.can_advance_to(Failed));
    }

    #[test]
    fn run_status_tolerates_unknown_values() {
        let status: RunStatus = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(status, RunStatus::Unknown);
        let conclusion: RunConclusion = serde_json::from_str("\"timed_out\"").unwrap();
        assert_eq!(conclusion, RunConclusion::TimedOut);
    }
}
