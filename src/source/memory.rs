//! In-memory alert source and authenticator
//!
//! Serves alerts from a local list with offset pagination and lets callers
//! inject failures (rate limits, network errors) ahead of real responses.
//! Used by tests and for offline demos.

use super::{AlertSource, FetchCursor, Page};
use crate::error::{Result, TalonError};
use crate::filter::FilterConfig;
use crate::session::{AccessToken, Authenticator, Session, TokenGrant};
use crate::types::{Alert, PageToken};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory alert source
pub struct MemorySource {
    alerts: Mutex<Vec<Alert>>,
    failures: Mutex<VecDeque<TalonError>>,
    page_size: usize,
    calls: AtomicU64,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MemorySource {
    pub fn new(page_size: usize) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            page_size: page_size.max(1),
            calls: AtomicU64::new(0),
        }
    }

    /// Add or replace (by id) an alert on the remote side
    pub fn put(&self, alert: Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            match alerts.iter_mut().find(|a| a.id == alert.id) {
                Some(existing) => *existing = alert,
                None => alerts.push(alert),
            }
        }
    }

    /// Queue an error to be returned by the next `fetch_page` call
    pub fn fail_next(&self, error: TalonError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    /// Queue `n` rate-limit responses
    pub fn rate_limit_next(&self, n: usize, retry_after: Option<Duration>) {
        for _ in 0..n {
            self.fail_next(TalonError::RateLimited { retry_after });
        }
    }

    /// Number of `fetch_page` calls served so far, failures included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSource for MemorySource {
    async fn fetch_page(
        &self,
        _session: &Session,
        cursor: &FetchCursor,
        _filter_hint: &FilterConfig,
    ) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(err);
        }

        let offset = match &cursor.page {
            Some(token) => token
                .as_str()
                .parse::<usize>()
                .map_err(|_| TalonError::validation("page token", token.to_string()))?,
            None => 0,
        };

        let mut matching: Vec<Alert> = self
            .alerts
            .lock()
            .map_err(|e| TalonError::Network(format!("source lock poisoned: {}", e)))?
            .iter()
            .filter(|a| a.timestamp >= cursor.since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len();
        let end = (offset + self.page_size).min(total);
        let alerts = matching.get(offset..end).map(<[Alert]>::to_vec).unwrap_or_default();
        let has_more = end < total;

        Ok(Page {
            alerts,
            next_cursor: has_more.then(|| PageToken::new(end.to_string())),
            has_more,
        })
    }

    async fn fetch_by_ids(&self, _session: &Session, ids: &[String]) -> Result<Vec<Alert>> {
        let alerts = self
            .alerts
            .lock()
            .map_err(|e| TalonError::Network(format!("source lock poisoned: {}", e)))?;
        Ok(alerts.iter().filter(|a| ids.contains(&a.id)).cloned().collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Authenticator that accepts a single client secret
pub struct StaticAuthenticator {
    secret: String,
    expires_in: Duration,
    issued: AtomicU64,
}

impl StaticAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_in: Duration::from_secs(1800),
            issued: AtomicU64::new(0),
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Number of tokens issued so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn request_token(
        &self,
        _base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenGrant> {
        if client_secret != self.secret {
            return Err(TalonError::Auth(format!("invalid credentials for {}", client_id)));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            token: AccessToken::new(format!("memory-token-{}", n)),
            expires_in: self.expires_in,
        })
    }
}
