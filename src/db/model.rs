//! Rows returned by the journal queries.

use chrono::{DateTime, Utc};

use crate::model::PublishStage;

/// One publish attempt with whatever is known about its deployment.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub attempt_id: String,
    pub repo: String,
    pub path: String,
    pub slug: String,
    pub title: String,
    pub stage: Option<PublishStage>,
    pub commit_sha: Option<String>,
    pub commit_url: Option<String>,
    pub error: Option<String>,
    pub deploy_status: Option<String>,
    pub deploy_conclusion: Option<String>,
    pub deploy_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
