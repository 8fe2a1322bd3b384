use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use blog_publisher::auth::resolve_credentials;
use blog_publisher::config;
use blog_publisher::db;
use blog_publisher::deploy::DeploymentPoller;
use blog_publisher::github::GitHubClient;
use blog_publisher::model::RepoRef;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Follow the workflow run of a commit until it finishes or the timeout expires"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Commit SHA whose run should be followed
    commit: String,

    /// Repository as owner/name (defaults to github.owner/github.repo)
    #[arg(long)]
    repo: Option<String>,

    /// Give up after this many seconds (defaults to app.deploy_timeout_ms)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let repo = match args.repo.as_deref() {
        Some(raw) => {
            let (owner, name) = raw
                .split_once('/')
                .filter(|(o, n)| !o.is_empty() && !n.is_empty())
                .ok_or_else(|| anyhow!("--repo must look like owner/name"))?;
            RepoRef::new(owner, name)
        }
        None => cfg
            .repo()
            .ok_or_else(|| anyhow!("no repository: pass --repo or set github.owner and github.repo"))?,
    };
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| cfg.deploy_timeout());

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}", cfg.database_path().display()));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let (credentials, source) = resolve_credentials(&cfg, &pool).await?;
    info!(credential = source.as_str(), repo = %repo, commit = %args.commit, "watching deployment");
    let client = Arc::new(GitHubClient::with_base_url(cfg.api_base()?, credentials)?);
    let poller = DeploymentPoller::new(client, cfg.poll_interval());

    let last = poller
        .poll_deployment_status(
            &repo,
            &args.commit,
            |status| {
                info!(
                    run_id = status.id,
                    status = status.status.as_str(),
                    conclusion = status.conclusion.as_ref().map(|c| c.as_str()).unwrap_or("none"),
                    "deployment status"
                );
            },
            timeout,
        )
        .await?;

    match last {
        Some(run) => {
            let updated = db::record_deployment(&pool, &run).await?;
            if updated == 0 {
                warn!(commit = %args.commit, "commit not found in publish history");
            }
            println!("{} {} {}", run.status.as_str(), run.conclusion.as_ref().map(|c| c.as_str()).unwrap_or("-"), run.html_url);
            if run.is_terminal() && !run.succeeded() {
                return Err(anyhow!("deployment did not succeed"));
            }
            if !run.is_terminal() {
                warn!(timeout_secs = timeout.as_secs(), "timed out before the run finished");
            }
        }
        None => {
            warn!(timeout_secs = timeout.as_secs(), "no workflow run seen for commit");
        }
    }
    Ok(())
}
