//! Bearer credential resolution.
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::error::AuthError;
use crate::github::app_auth::{AppSigner, InstallationTokenProvider};

/// Source of the bearer token sent with GitHub API calls.
///
/// `Ok(None)` means no credential is configured; callers treat it as "not signed in".
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<String>, AuthError>;
}

/// A fixed token: a personal access token or an OAuth token obtained earlier.
#[derive(Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: Some(token).filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn none() -> Self {
        Self { token: None }
    }

    pub fn from_option(token: Option<String>) -> Self {
        token.map(Self::new).unwrap_or_default()
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.token.clone())
    }
}

/// Where the active credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    PersonalToken,
    DeviceFlow,
    Installation,
    Anonymous,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::PersonalToken => "personal access token",
            CredentialSource::DeviceFlow => "device flow login",
            CredentialSource::Installation => "app installation",
            CredentialSource::Anonymous => "none",
        }
    }
}

/// Pick the credential for this run.
///
/// Order: `GITHUB_TOKEN` or `github.token`, then a token stored by `login`, then the App
/// installation when both `installation_id` and `private_key_path` are configured.
pub async fn resolve_credentials(
    cfg: &Config,
    pool: &Pool,
) -> anyhow::Result<(Arc<dyn CredentialProvider>, CredentialSource)> {
    if let Some(token) = cfg.personal_token() {
        debug!("using personal access token");
        return Ok((Arc::new(StaticToken::new(token)), CredentialSource::PersonalToken));
    }
    if let Some(token) = db::load_oauth_token(pool, db::GITHUB_PROVIDER).await? {
        debug!("using stored device flow token");
        return Ok((Arc::new(StaticToken::new(token)), CredentialSource::DeviceFlow));
    }
    if let Some(app) = &cfg.github.app {
        if let (Some(installation_id), Some(key_path)) = (app.installation_id, app.private_key_path.as_deref()) {
            let signer = AppSigner::from_pem_file(app.app_id, Path::new(key_path)).await?;
            let provider = InstallationTokenProvider::new(cfg.api_base()?, signer, installation_id)?;
            info!(app_id = app.app_id, installation_id, "using GitHub App installation token");
            return Ok((Arc::new(provider), CredentialSource::Installation));
        }
    }
    Ok((Arc::new(StaticToken::none()), CredentialSource::Anonymous))
}
