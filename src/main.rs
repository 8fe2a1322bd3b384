use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use blog_publisher::auth::{resolve_credentials, CredentialSource};
use blog_publisher::config::{self, Config};
use blog_publisher::db;
use blog_publisher::deploy::DeploymentPoller;
use blog_publisher::error::PublishError;
use blog_publisher::frontmatter::parse_post;
use blog_publisher::github::oauth::DeviceFlow;
use blog_publisher::github::GitHubClient;
use blog_publisher::model::{PublishConfig, PublishStage};
use blog_publisher::publish::{PublishService, PublishSettings};
use blog_publisher::status::PublishStatusStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Publish Markdown posts to a GitHub-hosted blog")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Commit a post file and follow the deployment it triggers
    Publish {
        /// Markdown file with YAML front matter
        file: PathBuf,
        /// Commit message (defaults to "Publish post: <title>")
        #[arg(long, short)]
        message: Option<String>,
        /// Target branch (defaults to github.branch, then the repository default)
        #[arg(long)]
        branch: Option<String>,
        /// Repository path, overriding <posts_dir>/<slug>.md
        #[arg(long)]
        path: Option<String>,
        /// Return after the commit without waiting for the deployment
        #[arg(long)]
        no_wait: bool,
    },
    /// Sign in through the GitHub App device flow and store the token
    Login,
    /// Forget the stored device flow token
    Logout,
    /// Show the active credential, its rate limit and repository access
    Check,
    /// List recent publish attempts
    History {
        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// Print an example configuration
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}", cfg.database_path().display()));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Publish {
            file,
            message,
            branch,
            path,
            no_wait,
        } => {
            let config = PublishConfig {
                message: message.unwrap_or_default(),
                branch,
                path,
            };
            publish(&cfg, &pool, file, config, no_wait).await
        }
        Command::Login => login(&cfg, &pool).await,
        Command::Logout => {
            if db::delete_oauth_token(&pool, db::GITHUB_PROVIDER).await? {
                println!("Stored token removed.");
            } else {
                println!("No stored token.");
            }
            Ok(())
        }
        Command::Check => check(&cfg, &pool).await,
        Command::History { limit } => history(&pool, limit).await,
        Command::ExampleConfig => Ok(()),
    }
}

async fn publish(cfg: &Config, pool: &db::Pool, file: PathBuf, config: PublishConfig, no_wait: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let post = parse_post(&text).with_context(|| format!("parsing {}", file.display()))?;
    if post.metadata.draft {
        warn!(file = %file.display(), "post is marked as draft; publishing anyway");
    }

    let (credentials, source) = resolve_credentials(cfg, pool).await?;
    info!(credential = source.as_str(), "resolved credentials");
    let client = Arc::new(GitHubClient::with_base_url(cfg.api_base()?, Arc::clone(&credentials))?);
    let poller = DeploymentPoller::new(client.clone(), cfg.poll_interval());
    let store = PublishStatusStore::new();
    let settings = PublishSettings {
        posts_dir: cfg.app.posts_dir.clone(),
        default_branch: cfg.github.branch.clone(),
        track_deployments: cfg.app.track_deployments && !no_wait,
        deploy_timeout: cfg.deploy_timeout(),
        web_base: cfg.web_base()?,
    };
    let service = PublishService::new(client, poller, credentials, cfg.repo(), store.clone(), settings);

    // Log every stage change as it happens.
    let mut updates = store.subscribe();
    let progress = tokio::spawn(async move {
        let mut last_stage = None;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if let Some(status) = snapshot.status {
                if last_stage != Some(status.stage) {
                    last_stage = Some(status.stage);
                    info!(stage = %status.stage, progress = status.progress, "{}", status.message);
                }
            }
            if let Some(run) = snapshot.deployment {
                info!(run_id = run.id, status = run.status.as_str(), "deployment update");
            }
        }
    });

    let attempt_id = Uuid::new_v4().to_string();
    let repo_name = cfg.repo().map(|r| r.to_string()).unwrap_or_default();
    let target = blog_publisher::frontmatter::resolve_target_path(&post, &config, &cfg.app.posts_dir);
    db::record_publish_started(pool, &attempt_id, &repo_name, &target, &post.target_slug(), &post.title).await?;

    let outcome = match service.publish_post(&post, &config).await {
        Ok(outcome) => outcome,
        Err(err) => {
            db::record_publish_finished(pool, &attempt_id, PublishStage::Failed, None, Some(&err.to_string())).await?;
            progress.abort();
            return Err(explain(err));
        }
    };
    db::record_publish_finished(pool, &attempt_id, PublishStage::Completed, Some(&outcome.commit), None).await?;
    println!(
        "{} {} -> {}",
        if outcome.created { "Created" } else { "Updated" },
        outcome.path,
        outcome.commit.html_url
    );

    if let Some(tracking) = outcome.tracking {
        match tracking.finished().await {
            Some(run) => {
                db::record_deployment(pool, &run).await?;
                let verdict = match (&run.conclusion, run.succeeded()) {
                    (_, true) => "succeeded".to_string(),
                    (Some(c), false) => c.as_str().to_string(),
                    (None, false) => run.status.as_str().to_string(),
                };
                println!("Deployment {}: {}", verdict, run.html_url);
            }
            None => println!("Deployment not observed; check the Actions tab."),
        }
    }
    progress.abort();
    Ok(())
}

fn explain(err: PublishError) -> anyhow::Error {
    if let PublishError::Validation(violations) = &err {
        let lines: Vec<String> = violations.iter().map(|v| format!("  - {}", v)).collect();
        return anyhow!("post is invalid:\n{}", lines.join("\n"));
    }
    let hint = match err {
        PublishError::AuthRequired => Some("run `login` or set GITHUB_TOKEN"),
        PublishError::NoRepositorySelected => Some("set github.owner and github.repo"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow!("{}; {}", err, hint),
        None => err.into(),
    }
}

async fn login(cfg: &Config, pool: &db::Pool) -> Result<()> {
    let app = cfg
        .github
        .app
        .as_ref()
        .ok_or_else(|| anyhow!("github.app.client_id is required for login"))?;
    let flow = DeviceFlow::new(cfg.web_base()?, app.client_id.clone())?;
    let code = flow.request_code().await?;
    println!("Open {} and enter code {}", code.verification_uri, code.user_code);
    let token = flow.poll_token(&code).await?;
    db::save_oauth_token(pool, db::GITHUB_PROVIDER, &token.access_token, &token.scope).await?;
    println!("Signed in.");
    Ok(())
}

async fn check(cfg: &Config, pool: &db::Pool) -> Result<()> {
    let (credentials, source) = resolve_credentials(cfg, pool).await?;
    println!("Credential: {}", source.as_str());
    if source == CredentialSource::Anonymous {
        warn!("no credential configured; publishing will fail");
    }
    let client = GitHubClient::with_base_url(cfg.api_base()?, credentials)?;
    let limit = client.rate_limit().await?;
    println!("Rate limit: {}/{} remaining, resets at {}", limit.remaining, limit.limit, limit.reset);

    let Some(repo) = cfg.repo() else {
        println!("Repository: not configured");
        return Ok(());
    };
    match client.repository_access(&repo).await {
        Ok(access) => println!(
            "Repository: {} (default branch {}), publish {}",
            access.full_name,
            access.default_branch,
            if access.can_publish() { "allowed" } else { "denied" }
        ),
        Err(err) => {
            error!(%err, repo = %repo, "repository check failed");
            return Err(err.into());
        }
    }
    Ok(())
}

async fn history(pool: &db::Pool, limit: i64) -> Result<()> {
    let records = db::recent_publishes(pool, limit).await?;
    if records.is_empty() {
        println!("No publishes yet.");
    }
    for r in records {
        let stage = r.stage.map(|s| s.as_str()).unwrap_or("unknown");
        let deploy = match (&r.deploy_status, &r.deploy_conclusion) {
            (_, Some(c)) => c.as_str(),
            (Some(s), None) => s.as_str(),
            (None, None) => "-",
        };
        println!(
            "{}  {:<10} {:<10} {}  {}",
            r.started_at.format("%Y-%m-%d %H:%M"),
            stage,
            deploy,
            r.path,
            r.commit_url.as_deref().or(r.error.as_deref()).unwrap_or("")
        );
    }
    Ok(())
}
