//! Configuration loader and validator for the blog publisher.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::frontmatter::is_repo_path;
use crate::model::RepoRef;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub github: GitHub,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Repository directory that receives posts when no explicit path is given.
    pub posts_dir: String,
    pub poll_interval_ms: u64,
    pub deploy_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub track_deployments: bool,
}

/// GitHub endpoints, target repository and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHub {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_web_base")]
    pub web_base: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Personal access token. `GITHUB_TOKEN` takes precedence when set.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub app: Option<GitHubApp>,
}

/// GitHub App registration used for installation tokens and the device flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHubApp {
    pub app_id: u64,
    pub client_id: String,
    #[serde(default)]
    pub installation_id: Option<u64>,
    #[serde(default)]
    pub private_key_path: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.github.com/".to_string()
}

fn default_web_base() -> String {
    "https://github.com/".to_string()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.app.poll_interval_ms)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.app.deploy_timeout_ms)
    }

    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("publisher.db")
    }

    /// Target repository, when both owner and name are configured.
    pub fn repo(&self) -> Option<RepoRef> {
        let owner = self.github.owner.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let name = self.github.repo.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(RepoRef::new(owner, name))
    }

    pub fn api_base(&self) -> Result<Url, ConfigError> {
        parse_base(&self.github.api_base).ok_or(ConfigError::Invalid("github.api_base must be an absolute URL"))
    }

    pub fn web_base(&self) -> Result<Url, ConfigError> {
        parse_base(&self.github.web_base).ok_or(ConfigError::Invalid("github.web_base must be an absolute URL"))
    }

    /// Personal access token from the environment or the file, whichever is set first.
    pub fn personal_token(&self) -> Option<String> {
        std::env::var("GITHUB_TOKEN")
            .ok()
            .or_else(|| self.github.token.clone())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Parse a base URL, normalising it to end with `/` so relative joins append.
fn parse_base(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash).ok().filter(|u| !u.cannot_be_a_base())
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    let posts_dir = cfg.app.posts_dir.trim();
    if posts_dir.is_empty() {
        return Err(ConfigError::Invalid("app.posts_dir must be non-empty"));
    }
    if posts_dir.starts_with('/') || !is_repo_path(posts_dir.trim_end_matches('/')) {
        return Err(ConfigError::Invalid("app.posts_dir must be a relative repository path"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.deploy_timeout_ms < cfg.app.poll_interval_ms {
        return Err(ConfigError::Invalid("app.deploy_timeout_ms must be >= app.poll_interval_ms"));
    }

    cfg.api_base()?;
    cfg.web_base()?;

    // owner and repo travel together; either both or neither.
    let owner = cfg.github.owner.as_deref().map(str::trim).unwrap_or("");
    let repo = cfg.github.repo.as_deref().map(str::trim).unwrap_or("");
    if owner.is_empty() != repo.is_empty() {
        return Err(ConfigError::Invalid("github.owner and github.repo must be set together"));
    }
    if let Some(branch) = &cfg.github.branch {
        if branch.trim().is_empty() {
            return Err(ConfigError::Invalid("github.branch must be non-empty when set"));
        }
    }

    if let Some(app) = &cfg.github.app {
        if app.app_id == 0 {
            return Err(ConfigError::Invalid("github.app.app_id must be > 0"));
        }
        if app.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("github.app.client_id must be non-empty"));
        }
        if app.installation_id.is_some()
            && app.private_key_path.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(ConfigError::Invalid(
                "github.app.private_key_path is required with github.app.installation_id",
            ));
        }
    }

    Ok(())
}

/// Returns a complete example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  posts_dir: "content/posts"
  poll_interval_ms: 5000
  deploy_timeout_ms: 600000
  track_deployments: true

github:
  api_base: "https://api.github.com/"
  web_base: "https://github.com/"
  owner: "octocat"
  repo: "blog"
  # branch: "main"
  # Personal access token; GITHUB_TOKEN overrides it.
  token: ""

  app:
    app_id: 123456
    client_id: "Iv1.0123456789abcdef"
    installation_id: 7654321
    private_key_path: "./github-app.pem"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.repo(), Some(RepoRef::new("octocat", "blog")));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert!(cfg.app.track_deployments);
    }

    #[test]
    fn invalid_intervals() {
        let mut cfg = example_cfg();
        cfg.app.poll_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_ms")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.app.deploy_timeout_ms = 10;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("deploy_timeout_ms")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_posts_dir() {
        let mut cfg = example_cfg();
        cfg.app.posts_dir = "../outside".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.app.posts_dir = "  ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn owner_and_repo_travel_together() {
        let mut cfg = example_cfg();
        cfg.github.repo = None;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("github.owner")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.github.owner = None;
        cfg.github.repo = None;
        validate(&cfg).unwrap();
        assert_eq!(cfg.repo(), None);
    }

    #[test]
    fn invalid_app_settings() {
        let mut cfg = example_cfg();
        cfg.github.app.as_mut().unwrap().app_id = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.github.app.as_mut().unwrap().private_key_path = None;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("private_key_path")), _ => panic!("wrong error") }
    }

    #[test]
    fn base_urls_gain_trailing_slash() {
        let mut cfg = example_cfg();
        cfg.github.api_base = "http://127.0.0.1:8080/api".into();
        let base = cfg.api_base().unwrap();
        assert_eq!(base.join("rate_limit").unwrap().path(), "/api/rate_limit");

        cfg.github.api_base = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let yaml = r#"app:
  data_dir: "./data"
  posts_dir: "posts"
  poll_interval_ms: 100
  deploy_timeout_ms: 1000
github: {}
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.github.api_base, "https://api.github.com/");
        assert!(cfg.app.track_deployments);
        assert!(cfg.github.app.is_none());
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.github.app.unwrap().installation_id, Some(7654321));
    }
}
