//! Error taxonomy for the publish path.
use std::fmt;
use thiserror::Error;

/// Failures reported by the GitHub REST API, split by what the caller can do about them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("GitHub rejected the credential (401): {body}")]
    Unauthorized { body: String },
    #[error("permission denied by GitHub (403): {body}")]
    Forbidden { body: String },
    #[error("GitHub rate limit exceeded{}", reset_hint(.reset_at))]
    RateLimited { reset_at: Option<i64>, body: String },
    #[error("conflict: the file changed on GitHub since its SHA was read (409): {body}")]
    Conflict { body: String },
    #[error("not found on GitHub (404): {body}")]
    NotFound { body: String },
    #[error("GitHub could not process the request (422): {body}")]
    Unprocessable { body: String },
    #[error("GitHub server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("unexpected GitHub response {status}: {body}")]
    Unexpected { status: u16, body: String },
    #[error("network error talking to GitHub: {0}")]
    Network(String),
    #[error("invalid GitHub response: {0}")]
    Decode(String),
    #[error("could not obtain a GitHub credential: {0}")]
    Credential(String),
}

fn reset_hint(reset_at: &Option<i64>) -> String {
    match reset_at {
        Some(epoch) => format!(" (resets at unix {})", epoch),
        None => String::new(),
    }
}

impl ApiError {
    /// Map a non-success HTTP status onto the taxonomy.
    ///
    /// `rate_remaining` is the value of the `x-ratelimit-remaining` header, if any;
    /// GitHub signals primary rate-limit exhaustion with a 403 carrying `0`.
    pub fn from_status(status: u16, body: String, rate_remaining: Option<u64>, rate_reset: Option<i64>) -> Self {
        match status {
            401 => ApiError::Unauthorized { body },
            403 if rate_remaining == Some(0) || body.to_ascii_lowercase().contains("rate limit") => {
                ApiError::RateLimited { reset_at: rate_reset, body }
            }
            403 => ApiError::Forbidden { body },
            404 => ApiError::NotFound { body },
            409 => ApiError::Conflict { body },
            422 => ApiError::Unprocessable { body },
            429 => ApiError::RateLimited { reset_at: rate_reset, body },
            s if (500..600).contains(&s) => ApiError::Server { status: s, body },
            s => ApiError::Unexpected { status: s, body },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. } | ApiError::Forbidden { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Credential resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("failed to read GitHub App private key: {0}")]
    PrivateKey(String),
    #[error("failed to sign GitHub App JWT: {0}")]
    Signing(String),
    #[error("installation token request failed: {0}")]
    Installation(#[source] ApiError),
    #[error("device authorization expired before it was approved")]
    DeviceCodeExpired,
    #[error("device authorization was denied by the user")]
    AccessDenied,
    #[error("OAuth error {code}: {description}")]
    OAuth { code: String, description: String },
    #[error("OAuth request failed: {0}")]
    Transport(#[source] ApiError),
}

/// One metadata rule broken by a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("authentication required: connect a GitHub account or set a token")]
    AuthRequired,
    #[error("no target repository selected")]
    NoRepositorySelected,
    #[error("a publish is already in progress")]
    AlreadyPublishing,
    #[error("invalid post metadata: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),
    #[error(transparent)]
    Api(ApiError),
    #[error("network error: {0}")]
    Network(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<ApiError> for PublishError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(msg) => PublishError::Network(msg),
            other => PublishError::Api(other),
        }
    }
}

impl PublishError {
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            PublishError::Validation(v) => v,
            _ => &[],
        }
    }
}

/// Raised while following a deployment. Never turned into a publish failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeploymentTrackingError {
    #[error("deployment status request failed: {0}")]
    Api(#[from] ApiError),
    #[error("credential unavailable while tracking deployment: {0}")]
    Auth(#[from] AuthError),
}
