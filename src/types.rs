//! Core data types: alerts, cursors, profiles, and query shapes
//!
//! Alerts keep the full remote JSON in `raw_payload`; the typed fields are
//! projections of it used for filtering, indexing, and display.

use crate::error::{Result, TalonError};
use crate::filter::FilterConfig;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest severity on the Falcon scale
pub const MAX_SEVERITY: u8 = 100;

/// A single alert as stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Remote-assigned identifier (primary key)
    pub id: String,

    /// Creation/detection time
    pub timestamp: DateTime<Utc>,

    /// Severity 0–100, higher is worse
    pub severity: u8,

    /// Product that raised the alert (e.g. "epp", "idp")
    pub product: String,

    /// Affected host, empty if the alert is not host-scoped
    pub hostname: String,

    /// Triage status (e.g. "new", "in_progress", "closed")
    pub status: String,

    /// Short display name
    #[serde(default)]
    pub name: String,

    /// Longer description
    #[serde(default)]
    pub description: String,

    /// Full remote representation
    pub raw_payload: serde_json::Value,
}

impl Alert {
    /// Project a raw Falcon alert entity into an `Alert`
    ///
    /// `observed_at` is used as the timestamp only when the payload carries
    /// none of `created_timestamp`, `timestamp`, or `updated_timestamp`.
    pub fn from_raw(raw: serde_json::Value, observed_at: DateTime<Utc>) -> Result<Self> {
        let id = str_field(&raw, &["composite_id", "id"]).ok_or_else(|| {
            TalonError::validation("alert", "payload has neither composite_id nor id")
        })?;

        let timestamp = ["created_timestamp", "timestamp", "updated_timestamp"]
            .iter()
            .filter_map(|k| raw.get(*k).and_then(|v| v.as_str()))
            .find_map(|s| parse_timestamp(s).ok())
            .unwrap_or(observed_at);

        let severity = raw
            .get("severity")
            .and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
            })
            .map(|n| n.min(MAX_SEVERITY as u64) as u8)
            .unwrap_or(0);

        let hostname = raw
            .get("device")
            .and_then(|d| d.get("hostname"))
            .and_then(|h| h.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            id,
            timestamp,
            severity,
            product: str_field(&raw, &["product", "source", "category"]).unwrap_or_default(),
            hostname,
            status: str_field(&raw, &["status"]).unwrap_or_default(),
            name: str_field(&raw, &["name", "display_name", "title"]).unwrap_or_default(),
            description: str_field(&raw, &["description"]).unwrap_or_default(),
            raw_payload: raw,
        })
    }

    /// Calendar day (UTC) the alert belongs to
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

fn str_field(raw: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| raw.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TalonError::validation("timestamp", format!("'{}': {}", s, e)))
}

/// Result of upserting one alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this id was stored
    Inserted,
    /// Id existed with a different payload; replaced
    Updated,
    /// Id existed with an identical payload; nothing changed
    Unchanged,
}

/// Opaque pagination token handed out by a remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-profile polling watermark
///
/// Advanced only in the same store transaction that persists the batch it
/// describes, so a restart never skips an unstored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCursor {
    /// Connection profile this cursor belongs to
    pub profile_id: String,

    /// Latest alert timestamp ingested for this profile
    pub watermark: DateTime<Utc>,

    /// Page token of the last completed fetch, passed through unexamined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<PageToken>,

    /// When the cursor was last advanced
    pub updated_at: DateTime<Utc>,
}

impl PollCursor {
    pub fn new(profile_id: impl Into<String>, watermark: DateTime<Utc>) -> Self {
        Self {
            profile_id: profile_id.into(),
            watermark,
            page_token: None,
            updated_at: Utc::now(),
        }
    }
}

/// A stored Falcon API connection profile
///
/// `sealed_secret` is whatever the configured `SecretProvider` produced; the
/// core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Stable profile name
    pub id: String,

    /// Falcon API client id
    pub client_id: String,

    /// Sealed client secret
    pub sealed_secret: String,

    /// API base URL (e.g. https://api.crowdstrike.com)
    pub base_url: String,

    pub created_at: DateTime<Utc>,
}

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Inclusive range of calendar days (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateRange {
    pub fn new(first: NaiveDate, last: NaiveDate) -> Result<Self> {
        if last < first {
            return Err(TalonError::validation(
                "date range",
                format!("{} is before {}", last, first),
            ));
        }
        Ok(Self { first, last })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            first: day,
            last: day,
        }
    }

    /// Equivalent UTC time range covering every day in the range
    pub fn to_time_range(&self) -> TimeRange {
        let start = self.first.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = (self.last + chrono::Days::new(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        TimeRange::new(start, end)
    }
}

/// Result ordering for store queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryOrder {
    /// Most recent first
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Predicate + range + limit used by detail, stats, and export readers
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub filter: Option<FilterConfig>,
    pub range: Option<TimeRange>,
    pub limit: Option<usize>,
    pub order: QueryOrder,
}

impl AlertQuery {
    /// Everything, newest first
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.order = QueryOrder::OldestFirst;
        self
    }
}

/// Export byte formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = TalonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(TalonError::validation(
                "export format",
                format!("'{}' (expected csv or json)", other),
            )),
        }
    }
}

/// How live alerts are printed while watching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = TalonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            other => Err(TalonError::validation(
                "output format",
                format!("'{}' (expected console or json)", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_from_raw_full_payload() {
        let raw = serde_json::json!({
            "composite_id": "cid:ind:abc",
            "id": "ind:abc",
            "created_timestamp": "2025-08-24T17:21:55.123Z",
            "severity": 70,
            "product": "epp",
            "status": "new",
            "name": "CredentialDumping",
            "description": "LSASS memory read",
            "device": {"hostname": "WS-042", "device_id": "d1"}
        });

        let alert = Alert::from_raw(raw.clone(), observed()).unwrap();
        assert_eq!(alert.id, "cid:ind:abc");
        assert_eq!(alert.severity, 70);
        assert_eq!(alert.product, "epp");
        assert_eq!(alert.hostname, "WS-042");
        assert_eq!(alert.status, "new");
        assert_eq!(alert.name, "CredentialDumping");
        assert_eq!(
            alert.timestamp,
            parse_timestamp("2025-08-24T17:21:55.123Z").unwrap()
        );
        assert_eq!(alert.raw_payload, raw);
    }

    #[test]
    fn test_from_raw_fallbacks() {
        let raw = serde_json::json!({
            "id": "ind:xyz",
            "updated_timestamp": "2025-03-01T10:00:00Z",
            "severity": "250",
            "source": "identity"
        });

        let alert = Alert::from_raw(raw, observed()).unwrap();
        assert_eq!(alert.id, "ind:xyz");
        assert_eq!(alert.severity, MAX_SEVERITY);
        assert_eq!(alert.product, "identity");
        assert_eq!(alert.hostname, "");
        assert_eq!(alert.day(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn test_from_raw_missing_timestamp_uses_observed() {
        let alert = Alert::from_raw(serde_json::json!({"id": "a"}), observed()).unwrap();
        assert_eq!(alert.timestamp, observed());
        assert_eq!(alert.severity, 0);
    }

    #[test]
    fn test_from_raw_requires_id() {
        let result = Alert::from_raw(serde_json::json!({"severity": 10}), observed());
        assert!(matches!(result, Err(TalonError::Validation { .. })));
    }

    #[test]
    fn test_date_range_to_time_range() {
        let day = NaiveDate::from_ymd_opt(2025, 8, 24).unwrap();
        let range = DateRange::single(day).to_time_range();
        assert!(range.contains(Utc.with_ymd_and_hms(2025, 8, 24, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2025, 8, 24, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2025, 8, 25, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_date_range_rejects_inverted() {
        let a = NaiveDate::from_ymd_opt(2025, 8, 24).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        assert!(DateRange::new(a, b).is_err());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(" json ".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!("console".parse::<OutputFormat>().unwrap(), OutputFormat::Console);
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_page_token_is_transparent() {
        let token = PageToken::new("500");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"500\"");
        assert_eq!(token.as_str(), "500");
    }
}
