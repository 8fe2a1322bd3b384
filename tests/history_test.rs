use chrono::{TimeZone, Utc};

use blog_publisher::auth::{resolve_credentials, CredentialProvider, CredentialSource};
use blog_publisher::config::{self, Config};
use blog_publisher::db;
use blog_publisher::model::{CommitInfo, DeploymentStatus, PublishStage, RunConclusion, RunStatus};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn commit() -> CommitInfo {
    CommitInfo {
        sha: "c0ffee".into(),
        html_url: "https://github.com/octocat/blog/commit/c0ffee".into(),
        content_sha: None,
    }
}

#[tokio::test]
async fn journal_tracks_attempt_lifecycle() {
    let pool = setup_pool().await;

    db::record_publish_started(&pool, "a1", "octocat/blog", "content/posts/hello.md", "hello", "Hello")
        .await
        .unwrap();
    let records = db::recent_publishes(&pool, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stage, Some(PublishStage::Preparing));
    assert!(records[0].finished_at.is_none());

    db::record_publish_finished(&pool, "a1", PublishStage::Completed, Some(&commit()), None)
        .await
        .unwrap();

    let run = DeploymentStatus {
        id: 99,
        name: Some("deploy".into()),
        head_sha: "c0ffee".into(),
        status: RunStatus::Completed,
        conclusion: Some(RunConclusion::Success),
        html_url: "https://github.com/octocat/blog/actions/runs/99".into(),
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
        updated_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 2, 0).unwrap(),
    };
    assert_eq!(db::record_deployment(&pool, &run).await.unwrap(), 1);

    let records = db::recent_publishes(&pool, 10).await.unwrap();
    let r = &records[0];
    assert_eq!(r.stage, Some(PublishStage::Completed));
    assert_eq!(r.commit_sha.as_deref(), Some("c0ffee"));
    assert_eq!(r.deploy_status.as_deref(), Some("completed"));
    assert_eq!(r.deploy_conclusion.as_deref(), Some("success"));
    assert_eq!(r.deploy_url.as_deref(), Some(run.html_url.as_str()));
    assert!(r.finished_at.is_some());
}

#[tokio::test]
async fn failed_attempts_keep_their_error_and_order() {
    let pool = setup_pool().await;

    db::record_publish_started(&pool, "a1", "octocat/blog", "p/one.md", "one", "One").await.unwrap();
    db::record_publish_finished(&pool, "a1", PublishStage::Failed, None, Some("conflict"))
        .await
        .unwrap();
    db::record_publish_started(&pool, "a2", "octocat/blog", "p/two.md", "two", "Two").await.unwrap();

    let records = db::recent_publishes(&pool, 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].attempt_id, "a2");
    assert_eq!(records[1].stage, Some(PublishStage::Failed));
    assert_eq!(records[1].error.as_deref(), Some("conflict"));
    assert_eq!(records[1].commit_sha, None);

    assert_eq!(db::recent_publishes(&pool, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn finishing_unknown_attempt_is_an_error() {
    let pool = setup_pool().await;
    assert!(db::record_publish_finished(&pool, "missing", PublishStage::Completed, None, None)
        .await
        .is_err());
}

#[tokio::test]
async fn duplicate_attempt_id_is_rejected() {
    let pool = setup_pool().await;
    db::record_publish_started(&pool, "a1", "o/r", "p.md", "p", "P").await.unwrap();
    assert!(db::record_publish_started(&pool, "a1", "o/r", "p.md", "p", "P").await.is_err());
}

#[tokio::test]
async fn oauth_token_upsert_and_delete() {
    let pool = setup_pool().await;
    assert_eq!(db::load_oauth_token(&pool, db::GITHUB_PROVIDER).await.unwrap(), None);

    db::save_oauth_token(&pool, db::GITHUB_PROVIDER, "gho_one", "repo").await.unwrap();
    db::save_oauth_token(&pool, db::GITHUB_PROVIDER, "gho_two", "repo").await.unwrap();
    assert_eq!(
        db::load_oauth_token(&pool, db::GITHUB_PROVIDER).await.unwrap().as_deref(),
        Some("gho_two")
    );

    assert!(db::delete_oauth_token(&pool, db::GITHUB_PROVIDER).await.unwrap());
    assert!(!db::delete_oauth_token(&pool, db::GITHUB_PROVIDER).await.unwrap());
}

fn config_without_secrets() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.github.token = None;
    cfg.github.app = None;
    cfg
}

#[tokio::test]
async fn credentials_fall_back_from_token_to_stored_login() {
    if std::env::var("GITHUB_TOKEN").is_ok() {
        return;
    }
    let pool = setup_pool().await;
    let mut cfg = config_without_secrets();

    let (provider, source) = resolve_credentials(&cfg, &pool).await.unwrap();
    assert_eq!(source, CredentialSource::Anonymous);
    assert_eq!(provider.bearer_token().await.unwrap(), None);

    db::save_oauth_token(&pool, db::GITHUB_PROVIDER, "gho_user", "repo").await.unwrap();
    let (provider, source) = resolve_credentials(&cfg, &pool).await.unwrap();
    assert_eq!(source, CredentialSource::DeviceFlow);
    assert_eq!(provider.bearer_token().await.unwrap().as_deref(), Some("gho_user"));

    cfg.github.token = Some("ghp_config".into());
    let (provider, source) = resolve_credentials(&cfg, &pool).await.unwrap();
    assert_eq!(source, CredentialSource::PersonalToken);
    assert_eq!(provider.bearer_token().await.unwrap().as_deref(), Some("ghp_config"));
}

#[tokio::test]
async fn app_installation_needs_a_readable_key() {
    if std::env::var("GITHUB_TOKEN").is_ok() {
        return;
    }
    let pool = setup_pool().await;
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.github.token = None;
    cfg.github.app.as_mut().unwrap().private_key_path = Some("/nonexistent/key.pem".into());
    assert!(resolve_credentials(&cfg, &pool).await.is_err());

    cfg.github.app.as_mut().unwrap().private_key_path =
        Some(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/app_private_key.pem").into());
    let (_provider, source) = resolve_credentials(&cfg, &pool).await.unwrap();
    assert_eq!(source, CredentialSource::Installation);
}
