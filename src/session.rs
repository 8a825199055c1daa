//! Credential-scoped session management
//!
//! A `Session` is the authenticated handle for one connection profile. The
//! `SessionManager` obtains sessions through an `Authenticator` (the remote
//! token endpoint) and refreshes them shortly before they expire.

use crate::error::{Result, TalonError};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::secret::SecretProvider;
use crate::types::ConnectionProfile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Refresh tokens this long before they expire
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Bearer token; `Debug` never prints the value
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Token issued by the remote auth endpoint
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: AccessToken,
    /// Lifetime from the moment of issue
    pub expires_in: Duration,
}

/// Authenticated handle for one profile
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_id: String,
    pub base_url: String,
    pub token: AccessToken,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the token is usable at `now` with `margin` to spare
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        now < self.expires_at - margin
    }
}

/// Remote token endpoint
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Exchange client credentials for a token
    ///
    /// Must return `TalonError::Auth` for rejected credentials and a
    /// retryable error (`Network`, `RateLimited`) for transient failures.
    async fn request_token(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenGrant>;
}

/// Issues and refreshes sessions
pub struct SessionManager {
    auth: Arc<dyn Authenticator>,
    secrets: Arc<dyn SecretProvider>,
    retry: RetryPolicy,
    refresh_margin: Duration,
    profiles: std::sync::RwLock<std::collections::HashMap<String, ConnectionProfile>>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn Authenticator>, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            auth,
            secrets,
            retry: RetryPolicy::default(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            profiles: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    /// Authenticate `profile`, retrying transient failures
    pub async fn authenticate(&self, profile: &ConnectionProfile) -> Result<Session> {
        let secret = self.secrets.reveal(&profile.sealed_secret)?;
        let base_url = profile.base_url.trim_end_matches('/').to_string();

        let grant = retry_with_backoff(
            &self.retry,
            || self.auth.request_token(&base_url, &profile.client_id, &secret),
            |attempt, delay, err| {
                tracing::warn!(
                    profile = %profile.id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Token request failed, retrying"
                );
            },
        )
        .await
        .map_err(|e| match e {
            TalonError::Auth(_) => e,
            TalonError::Api { status, body } => {
                TalonError::Auth(format!("token endpoint returned {}: {}", status, body))
            }
            other => other,
        })?;

        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(profile.id.clone(), profile.clone());
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(grant.expires_in)
                .unwrap_or_else(|_| chrono::Duration::seconds(1800));

        tracing::info!(profile = %profile.id, %expires_at, "Authenticated");

        Ok(Session {
            profile_id: profile.id.clone(),
            base_url,
            token: grant.token,
            expires_at,
        })
    }

    /// Return `session` unchanged if still valid, otherwise re-authenticate
    ///
    /// Fails with `TalonError::Auth` when the profile that issued the session
    /// is no longer known to this manager.
    pub async fn ensure_valid(&self, session: Session) -> Result<Session> {
        if session.is_valid_at(Utc::now(), self.refresh_margin) {
            return Ok(session);
        }

        let profile = self
            .profiles
            .read()
            .ok()
            .and_then(|p| p.get(&session.profile_id).cloned())
            .ok_or_else(|| {
                TalonError::Auth(format!(
                    "session for '{}' expired and cannot be refreshed",
                    session.profile_id
                ))
            })?;

        tracing::debug!(profile = %profile.id, "Refreshing expired token");
        self.authenticate(&profile).await
    }

    /// Drop cached credentials for a profile, forcing explicit re-authentication
    pub fn forget(&self, profile_id: &str) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.remove(profile_id);
        }
    }
}
