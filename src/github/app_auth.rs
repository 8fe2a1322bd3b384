//! GitHub App authentication: RS256 app JWTs exchanged for installation tokens.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::model::InstallationTokenResponse;
use super::{error_from_response, http_client, GITHUB_API_VERSION};
use crate::auth::CredentialProvider;
use crate::error::{ApiError, AuthError};

/// Backdate `iat` to absorb clock drift between us and GitHub.
const IAT_SKEW_SECS: i64 = 60;
/// GitHub caps app JWT lifetime at ten minutes.
const JWT_TTL_SECS: i64 = 9 * 60;
/// Refresh installation tokens this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs app JWTs with the App's RSA private key.
#[derive(Clone)]
pub struct AppSigner {
    app_id: u64,
    key: EncodingKey,
}

impl fmt::Debug for AppSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSigner")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl AppSigner {
    pub fn from_pem(app_id: u64, pem: &[u8]) -> Result<Self, AuthError> {
        let key = EncodingKey::from_rsa_pem(pem).map_err(|e| AuthError::PrivateKey(e.to_string()))?;
        Ok(Self { app_id, key })
    }

    pub async fn from_pem_file(app_id: u64, path: &Path) -> Result<Self, AuthError> {
        let pem = tokio::fs::read(path)
            .await
            .map_err(|e| AuthError::PrivateKey(format!("{}: {}", path.display(), e)))?;
        Self::from_pem(app_id, &pem)
    }

    pub fn claims_at(&self, now: DateTime<Utc>) -> AppClaims {
        let now = now.timestamp();
        AppClaims {
            iss: self.app_id.to_string(),
            iat: now - IAT_SKEW_SECS,
            exp: now + JWT_TTL_SECS,
        }
    }

    pub fn sign_at(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = self.claims_at(now);
        encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn sign(&self) -> Result<String, AuthError> {
        self.sign_at(Utc::now())
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Credential provider minting installation access tokens on demand.
///
/// Tokens are cached and reused until they are within five minutes of expiry.
pub struct InstallationTokenProvider {
    http: Client,
    base_url: Url,
    signer: AppSigner,
    installation_id: u64,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for InstallationTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationTokenProvider")
            .field("base_url", &self.base_url)
            .field("installation_id", &self.installation_id)
            .finish_non_exhaustive()
    }
}

impl InstallationTokenProvider {
    pub fn new(base_url: Url, signer: AppSigner, installation_id: u64) -> Result<Self, AuthError> {
        Ok(Self {
            http: http_client().map_err(AuthError::Installation)?,
            base_url,
            signer,
            installation_id,
            cached: Mutex::new(None),
        })
    }

    #[instrument(skip_all, fields(installation_id = self.installation_id))]
    async fn mint(&self) -> Result<CachedToken, AuthError> {
        let jwt = self.signer.sign()?;
        let url = self
            .base_url
            .join(&format!("app/installations/{}/access_tokens", self.installation_id))
            .map_err(|e| AuthError::Installation(ApiError::Network(e.to_string())))?;
        let res = self
            .http
            .post(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header(AUTHORIZATION, format!("Bearer {}", jwt))
            .send()
            .await
            .map_err(|e| AuthError::Installation(e.into()))?;
        if !res.status().is_success() {
            return Err(AuthError::Installation(error_from_response(res).await));
        }
        let payload: InstallationTokenResponse = res.json().await.map_err(|e| AuthError::Installation(e.into()))?;
        info!(expires_at = %payload.expires_at, "minted installation token");
        Ok(CachedToken {
            token: payload.token,
            expires_at: payload.expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for InstallationTokenProvider {
    async fn bearer_token(&self) -> Result<Option<String>, AuthError> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - Utc::now() > Duration::seconds(REFRESH_MARGIN_SECS) {
                return Ok(Some(cached.token.clone()));
            }
            debug!("installation token close to expiry; refreshing");
        }
        let fresh = self.mint().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(Some(token))
    }
}
