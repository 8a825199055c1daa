//! Remote alert source: the abstraction over the paginated alert API
//!
//! The ingest pipeline drives pagination itself: it calls `fetch_page` with
//! the `next_cursor` of the previous page until `has_more` is false. Rate
//! limits surface as `TalonError::RateLimited` so the caller can back off.

use crate::error::Result;
use crate::filter::FilterConfig;
use crate::session::Session;
use crate::types::{Alert, PageToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod falcon;
pub mod memory;

/// Where to resume fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCursor {
    /// Only alerts created at or after this instant
    pub since: DateTime<Utc>,

    /// Page within the result set; `None` for the first page
    pub page: Option<PageToken>,
}

impl FetchCursor {
    pub fn starting_at(since: DateTime<Utc>) -> Self {
        Self { since, page: None }
    }

    /// Cursor for the page after `page`
    pub fn next(&self, page: &Page) -> Option<Self> {
        if !page.has_more {
            return None;
        }
        Some(Self {
            since: self.since,
            page: page.next_cursor.clone(),
        })
    }
}

/// One page of alerts
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub alerts: Vec<Alert>,
    /// Opaque token for the next page
    pub next_cursor: Option<PageToken>,
    pub has_more: bool,
}

/// A paginated, rate-limited remote alert API
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Fetch one page
    ///
    /// `filter_hint` may be pushed down to the remote query to reduce
    /// traffic; callers still evaluate the full filter locally.
    async fn fetch_page(
        &self,
        session: &Session,
        cursor: &FetchCursor,
        filter_hint: &FilterConfig,
    ) -> Result<Page>;

    /// Fetch full alert entities by id (detail view against the remote)
    async fn fetch_by_ids(&self, session: &Session, ids: &[String]) -> Result<Vec<Alert>>;

    /// Source name (e.g. "falcon", "memory")
    fn name(&self) -> &str;
}
