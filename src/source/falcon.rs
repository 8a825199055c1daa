//! CrowdStrike Falcon alert API client
//!
//! Implements both `Authenticator` (OAuth2 client credentials) and
//! `AlertSource` (alert id query + entity fetch) over reqwest.

use super::{AlertSource, FetchCursor, Page};
use crate::error::{Result, TalonError};
use crate::filter::FilterConfig;
use crate::session::{AccessToken, Authenticator, Session, TokenGrant};
use crate::types::{Alert, PageToken};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = concat!("talon/", env!("CARGO_PKG_VERSION"));
const TOKEN_PATH: &str = "/oauth2/token";
const QUERY_PATH: &str = "/alerts/queries/alerts/v1";
const ENTITIES_PATH: &str = "/alerts/entities/alerts/v1";

/// Maximum ids per entity request
pub const ENTITY_CHUNK: usize = 500;

/// Default token lifetime when the endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 1800;

/// Falcon client settings
#[derive(Debug, Clone)]
pub struct FalconConfig {
    /// Alert ids requested per page
    pub page_size: usize,
    /// Timeout for the token request
    pub auth_timeout: Duration,
    /// Timeout for query and entity requests
    pub request_timeout: Duration,
}

impl Default for FalconConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            auth_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Falcon API client
pub struct FalconClient {
    http: reqwest::Client,
    config: FalconConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    resources: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct EntitiesResponse {
    #[serde(default)]
    resources: Option<Vec<serde_json::Value>>,
}

impl FalconClient {
    pub fn new(config: FalconConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TalonError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Query one page of alert ids, returning ids and the pagination outcome
    async fn query_ids(
        &self,
        session: &Session,
        cursor: &FetchCursor,
        filter_hint: &FilterConfig,
    ) -> Result<(Vec<String>, Option<PageToken>, bool)> {
        let offset = match &cursor.page {
            Some(token) => token.as_str().parse::<u64>().map_err(|_| {
                TalonError::validation("page token", format!("'{}' is not an offset", token))
            })?,
            None => 0,
        };

        let params = [
            ("filter", build_fql(cursor.since, filter_hint)),
            ("sort", "created_timestamp.asc".to_string()),
            ("limit", self.config.page_size.to_string()),
            ("offset", offset.to_string()),
        ];

        let resp = self
            .http
            .get(format!("{}{}", session.base_url, QUERY_PATH))
            .bearer_auth(session.token.as_str())
            .query(&params)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body: QueryResponse = check_status(resp).await?.json().await?;

        let ids = body.resources.unwrap_or_default();
        let pagination = body.meta.and_then(|m| m.pagination).unwrap_or_default();
        let (next, has_more) = next_offset(offset, ids.len() as u64, &pagination);

        tracing::debug!(
            offset,
            returned = ids.len(),
            total = ?pagination.total,
            has_more,
            "Queried alert ids"
        );

        Ok((ids, has_more.then(|| PageToken::new(next.to_string())), has_more))
    }

    async fn fetch_entities(&self, session: &Session, ids: &[String]) -> Result<Vec<Alert>> {
        let observed_at = Utc::now();
        let mut alerts = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(ENTITY_CHUNK) {
            let resp = self
                .http
                .post(format!("{}{}", session.base_url, ENTITIES_PATH))
                .bearer_auth(session.token.as_str())
                .json(&serde_json::json!({ "ids": chunk }))
                .timeout(self.config.request_timeout)
                .send()
                .await?;
            let body: EntitiesResponse = check_status(resp).await?.json().await?;

            for raw in body.resources.unwrap_or_default() {
                match Alert::from_raw(raw, observed_at) {
                    Ok(alert) => alerts.push(alert),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed alert entity"),
                }
            }
        }

        Ok(alerts)
    }
}

/// Build the FQL filter for alerts created at or after `since`
pub fn build_fql(since: DateTime<Utc>, hint: &FilterConfig) -> String {
    let mut fql = format!(
        "created_timestamp:>='{}'",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if let Some(sev) = hint.min_severity {
        fql.push_str(&format!("+severity:>={}", sev));
    }
    fql
}

fn next_offset(offset: u64, returned: u64, pagination: &Pagination) -> (u64, bool) {
    let start = pagination.offset.unwrap_or(offset);
    let step = pagination.limit.unwrap_or(returned);
    let total = pagination.total.unwrap_or(start + returned);
    let next = start + step;
    (next, step > 0 && next < total)
}

/// Parse a `Retry-After` header given in seconds
fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Map a non-success response onto the error taxonomy
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TalonError::RateLimited {
            retry_after: retry_after(&resp),
        });
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TalonError::Auth(format!(
            "{} {}",
            status.as_u16(),
            truncate(&body, 200)
        ))),
        s if s.is_server_error() => Err(TalonError::Network(format!(
            "server error {}: {}",
            s.as_u16(),
            truncate(&body, 200)
        ))),
        s => Err(TalonError::Api {
            status: s.as_u16(),
            body: truncate(&body, 500),
        }),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl Authenticator for FalconClient {
    async fn request_token(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenGrant> {
        let resp = self
            .http
            .post(format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH))
            .form(&[("client_id", client_id), ("client_secret", client_secret)])
            .timeout(self.config.auth_timeout)
            .send()
            .await?;

        if resp.status() == StatusCode::BAD_REQUEST {
            let body = resp.text().await.unwrap_or_default();
            return Err(TalonError::Auth(truncate(&body, 200)));
        }

        let body: TokenResponse = check_status(resp).await?.json().await?;
        Ok(TokenGrant {
            token: AccessToken::new(body.access_token),
            expires_in: Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)),
        })
    }
}

#[async_trait]
impl AlertSource for FalconClient {
    async fn fetch_page(
        &self,
        session: &Session,
        cursor: &FetchCursor,
        filter_hint: &FilterConfig,
    ) -> Result<Page> {
        let (ids, next_cursor, has_more) = self.query_ids(session, cursor, filter_hint).await?;
        let alerts = self.fetch_entities(session, &ids).await?;
        Ok(Page {
            alerts,
            next_cursor,
            has_more,
        })
    }

    async fn fetch_by_ids(&self, session: &Session, ids: &[String]) -> Result<Vec<Alert>> {
        self.fetch_entities(session, ids).await
    }

    fn name(&self) -> &str {
        "falcon"
    }
}
