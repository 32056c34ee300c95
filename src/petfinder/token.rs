//! OAuth2 client-credentials bearer tokens with an on-disk cache.

use crate::config::RetryConfig;
use crate::error::{AuthError, Error, Result};
use crate::retry::retry_with_backoff;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TOKEN_FILE: &str = "access_token";
const EXPIRY_FILE: &str = "access_token.expiry";

/// A bearer token and the instant after which it must not be used
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BearerToken {
    /// Token sent in the `Authorization` header
    pub token: String,
    /// Absolute expiry, already reduced by the safety margin
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    /// Whether the token may still be used at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Token cache stored as a file pair inside a directory
///
/// `access_token` holds the token text, `access_token.expiry` the expiry as
/// unix seconds. Only one writer is expected at a time.
#[derive(Clone, Debug)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    /// Cache rooted at `dir` (created on first store)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn expiry_path(&self) -> PathBuf {
        self.dir.join(EXPIRY_FILE)
    }

    /// Read the cached token, if both files exist and parse
    ///
    /// A half-written or corrupt pair is treated as an empty cache.
    pub async fn load(&self) -> Option<BearerToken> {
        let token = tokio::fs::read_to_string(self.token_path()).await.ok()?;
        let expiry = tokio::fs::read_to_string(self.expiry_path()).await.ok()?;

        let token = token.trim().to_string();
        let expires_at = match expiry.trim().parse::<i64>() {
            Ok(secs) => Utc.timestamp_opt(secs, 0).single()?,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.expiry_path().display(), "Ignoring corrupt token expiry");
                return None;
            }
        };

        if token.is_empty() {
            return None;
        }
        Some(BearerToken { token, expires_at })
    }

    /// Persist a token and its expiry
    pub async fn store(&self, token: &BearerToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::filesystem(&self.dir, e))?;

        // Expiry is written last so a reader never pairs a new expiry with an old token
        write_private(&self.token_path(), &token.token).await?;
        write_private(
            &self.expiry_path(),
            &token.expires_at.timestamp().to_string(),
        )
        .await?;
        Ok(())
    }

    /// Drop the cached token so the next request fetches a new one
    pub async fn invalidate(&self) {
        for path in [self.expiry_path(), self.token_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "Failed to remove cached token file")
                }
            }
        }
    }
}

async fn write_private(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::filesystem(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::filesystem(path, e))?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Obtains bearer tokens, reusing the cached one while it is valid
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: TokenCache,
    retry: RetryConfig,
    safety_margin: Duration,
}

impl TokenManager {
    /// Create a manager for the token endpoint under `base_url`
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        cache: TokenCache,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth2/token", base_url.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache,
            retry: RetryConfig::default(),
            safety_margin: Duration::from_secs(60),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the safety margin subtracted from issued lifetimes
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// The cache this manager reads and writes
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Return a valid token, requesting a new one only when the cache is empty or expired
    pub async fn get_token(&self) -> Result<BearerToken> {
        if let Some(cached) = self.cache.load().await {
            if cached.is_valid_at(Utc::now()) {
                tracing::debug!(expires_at = %cached.expires_at, "Using cached bearer token");
                return Ok(cached);
            }
            tracing::info!(expired_at = %cached.expires_at, "Cached bearer token expired");
        }

        let token = retry_with_backoff(&self.retry, || self.request_token()).await?;
        self.cache.store(&token).await?;
        tracing::info!(expires_at = %token.expires_at, "Obtained new bearer token");
        Ok(token)
    }

    /// Discard the cached token and request a new one
    pub async fn refresh(&self) -> Result<BearerToken> {
        self.cache.invalidate().await;
        self.get_token().await
    }

    async fn request_token(&self) -> std::result::Result<BearerToken, AuthError> {
        let issued_at = Utc::now();
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if matches!(status, 400 | 401 | 403) {
            return Err(AuthError::Rejected { status });
        }
        if !response.status().is_success() {
            return Err(AuthError::Status { status });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        if body.access_token.trim().is_empty() {
            return Err(AuthError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(self.safety_margin);
        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|e| AuthError::MalformedResponse(format!("expires_in out of range: {e}")))?;

        Ok(BearerToken {
            token: body.access_token,
            expires_at: issued_at + lifetime,
        })
    }
}
