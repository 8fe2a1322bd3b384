//! OAuth device flow for signing a user in through the GitHub App.
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::model::{AccessTokenResponse, DeviceCode};
use super::{error_from_response, http_client};
use crate::error::{ApiError, AuthError};

const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
/// Cap on how long a device code is polled, whatever `expires_in` claims.
const MAX_CODE_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Token obtained by the device flow.
#[derive(Clone, PartialEq, Eq)]
pub struct UserToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: String,
}

impl std::fmt::Debug for UserToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserToken")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct DeviceFlow {
    http: Client,
    web_base: Url,
    client_id: String,
}

impl DeviceFlow {
    pub fn new(web_base: Url, client_id: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self {
            http: http_client().map_err(AuthError::Transport)?,
            web_base,
            client_id: client_id.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.web_base
            .join(path)
            .map_err(|e| AuthError::Transport(ApiError::Network(e.to_string())))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T, AuthError> {
        let res = self
            .http
            .post(self.endpoint(path)?)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.into()))?;
        if !res.status().is_success() {
            return Err(AuthError::Transport(error_from_response(res).await));
        }
        res.json().await.map_err(|e| AuthError::Transport(e.into()))
    }

    /// Start the flow; the user enters `user_code` at `verification_uri`.
    #[instrument(skip_all)]
    pub async fn request_code(&self) -> Result<DeviceCode, AuthError> {
        let code: DeviceCode = self
            .post_form("login/device/code", &[("client_id", self.client_id.as_str())])
            .await?;
        info!(verification_uri = %code.verification_uri, expires_in = code.expires_in, "device code issued");
        Ok(code)
    }

    /// Poll until the user approves, denies, or the code expires.
    #[instrument(skip_all)]
    pub async fn poll_token(&self, code: &DeviceCode) -> Result<UserToken, AuthError> {
        let deadline = code_deadline(Instant::now(), code.expires_in);
        let mut interval = Duration::from_secs(code.interval.max(1));

        loop {
            tokio::time::sleep(interval).await;
            if Instant::now() >= deadline {
                return Err(AuthError::DeviceCodeExpired);
            }

            let res: AccessTokenResponse = self
                .post_form(
                    "login/oauth/access_token",
                    &[
                        ("client_id", self.client_id.as_str()),
                        ("device_code", code.device_code.as_str()),
                        ("grant_type", DEVICE_GRANT),
                    ],
                )
                .await?;

            if let Some(access_token) = res.access_token.filter(|t| !t.is_empty()) {
                info!("device flow approved");
                return Ok(UserToken {
                    access_token,
                    token_type: res.token_type.unwrap_or_else(|| "bearer".to_string()),
                    scope: res.scope.unwrap_or_default(),
                });
            }

            match res.error.as_deref() {
                Some("authorization_pending") => debug!("authorization pending"),
                Some("slow_down") => {
                    interval = res
                        .interval
                        .map(Duration::from_secs)
                        .unwrap_or(interval.saturating_add(SLOW_DOWN_STEP));
                    debug!(interval_secs = interval.as_secs(), "asked to slow down");
                }
                Some("expired_token") => return Err(AuthError::DeviceCodeExpired),
                Some("access_denied") => return Err(AuthError::AccessDenied),
                Some(other) => {
                    return Err(AuthError::OAuth {
                        code: other.to_string(),
                        description: res.error_description.unwrap_or_default(),
                    })
                }
                None => {
                    return Err(AuthError::OAuth {
                        code: "empty_response".to_string(),
                        description: "response carried neither a token nor an error".to_string(),
                    })
                }
            }
        }
    }
}

fn code_deadline(now: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).min(MAX_CODE_LIFETIME);
    now.checked_add(lifetime).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_deadline_is_bounded() {
        let now = Instant::now();
        assert_eq!(code_deadline(now, 900), now + Duration::from_secs(900));
        assert_eq!(code_deadline(now, u64::MAX), now + MAX_CODE_LIFETIME);
    }
}
