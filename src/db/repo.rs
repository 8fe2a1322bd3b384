use super::model::PublishRecord;
use crate::model::{CommitInfo, DeploymentStatus, PublishStage};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Provider key for tokens obtained through the GitHub device flow.
pub const GITHUB_PROVIDER: &str = "github";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let pool = SqlitePool::connect(&prepare_sqlite_url(database_url)).await?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// Normalise a file-backed SQLite URL: expand `~/`, create the parent directory and
/// default to `mode=rwc` so the database file is created on first use.
pub fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => PathBuf::from(home).join(tail),
        _ => PathBuf::from(path),
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        let _ = std::fs::create_dir_all(dir);
    }

    let query = match query {
        "" => "mode=rwc".to_string(),
        q if q.contains("mode=") => q.to_string(),
        q => format!("{}&mode=rwc", q),
    };
    format!("sqlite://{}?{}", path.display(), query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(attempt_id = %attempt_id))]
pub async fn record_publish_started(
    pool: &Pool,
    attempt_id: &str,
    repo: &str,
    path: &str,
    slug: &str,
    title: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO publish_history (attempt_id, repo, path, slug, title, stage, started_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(attempt_id)
    .bind(repo)
    .bind(path)
    .bind(slug)
    .bind(title)
    .bind(PublishStage::Preparing.as_str())
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn record_publish_finished(
    pool: &Pool,
    attempt_id: &str,
    stage: PublishStage,
    commit: Option<&CommitInfo>,
    error: Option<&str>,
) -> Result<()> {
    let res = sqlx::query(
        "UPDATE publish_history SET stage = ?, commit_sha = ?, commit_url = ?, error = ?, finished_at = ? WHERE attempt_id = ?",
    )
    .bind(stage.as_str())
    .bind(commit.map(|c| c.sha.as_str()))
    .bind(commit.map(|c| c.html_url.as_str()))
    .bind(error)
    .bind(Utc::now())
    .bind(attempt_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("no publish attempt {}", attempt_id));
    }
    Ok(())
}

/// Store the latest deployment snapshot against every attempt that produced `status.head_sha`.
#[instrument(skip_all)]
pub async fn record_deployment(pool: &Pool, status: &DeploymentStatus) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE publish_history SET deploy_run_id = ?, deploy_status = ?, deploy_conclusion = ?, deploy_url = ? WHERE commit_sha = ?",
    )
    .bind(status.id as i64)
    .bind(status.status.as_str())
    .bind(status.conclusion.as_ref().map(|c| c.as_str()))
    .bind(&status.html_url)
    .bind(&status.head_sha)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

fn map_record(row: SqliteRow) -> PublishRecord {
    let stage: String = row.get("stage");
    PublishRecord {
        attempt_id: row.get("attempt_id"),
        repo: row.get("repo"),
        path: row.get("path"),
        slug: row.get("slug"),
        title: row.get("title"),
        stage: PublishStage::parse_stage(&stage),
        commit_sha: row.get("commit_sha"),
        commit_url: row.get("commit_url"),
        error: row.get("error"),
        deploy_status: row.get("deploy_status"),
        deploy_conclusion: row.get("deploy_conclusion"),
        deploy_url: row.get("deploy_url"),
        started_at: row.get::<DateTime<Utc>, _>("started_at"),
        finished_at: row.get::<Option<DateTime<Utc>>, _>("finished_at"),
    }
}

#[instrument(skip_all)]
pub async fn recent_publishes(pool: &Pool, limit: i64) -> Result<Vec<PublishRecord>> {
    let rows = sqlx::query(
        "SELECT attempt_id, repo, path, slug, title, stage, commit_sha, commit_url, error, deploy_status, deploy_conclusion, deploy_url, started_at, finished_at FROM publish_history ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(map_record).collect())
}

#[instrument(skip_all)]
pub async fn save_oauth_token(pool: &Pool, provider: &str, access_token: &str, scope: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO oauth_tokens (provider, access_token, scope, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(provider) DO UPDATE SET access_token = excluded.access_token, scope = excluded.scope, created_at = excluded.created_at",
    )
    .bind(provider)
    .bind(access_token)
    .bind(scope)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_oauth_token(pool: &Pool, provider: &str) -> Result<Option<String>> {
    let token = sqlx::query_scalar::<_, String>("SELECT access_token FROM oauth_tokens WHERE provider = ?")
        .bind(provider)
        .fetch_optional(pool)
        .await?;
    Ok(token)
}

#[instrument(skip_all)]
pub async fn delete_oauth_token(pool: &Pool, provider: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM oauth_tokens WHERE provider = ?")
        .bind(provider)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_sqlite_url_passes_memory_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn prepare_sqlite_url_adds_create_mode() {
        let td = tempfile::tempdir().unwrap();
        let db = td.path().join("nested").join("publisher.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", db.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", db.display()));
        assert!(db.parent().unwrap().exists());

        let url = prepare_sqlite_url(&format!("sqlite://{}?mode=ro", db.display()));
        assert!(url.ends_with("?mode=ro"));
    }
}
