//! Alert filter evaluation
//!
//! A `FilterConfig` is an immutable-per-evaluation snapshot. The same
//! predicate is used for live display and for persistence, so what the
//! operator sees and what lands in the store never diverge.

use crate::error::{Result, TalonError};
use crate::types::{Alert, MAX_SEVERITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Filter criteria; an absent criterion always matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum severity (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<u8>,

    /// Accepted products, lowercase
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub products: BTreeSet<String>,

    /// Accepted hostnames, lowercase
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hostnames: BTreeSet<String>,

    /// Accepted statuses, lowercase
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub statuses: BTreeSet<String>,

    /// Substrings, any of which must appear in a textual field, lowercase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Filter fields addressable from the operator surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Severity,
    Product,
    Hostname,
    Status,
    Keywords,
}

impl std::str::FromStr for FilterField {
    type Err = TalonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "severity" | "sev" => Ok(Self::Severity),
            "product" | "products" => Ok(Self::Product),
            "hostname" | "host" | "hostnames" => Ok(Self::Hostname),
            "status" | "statuses" => Ok(Self::Status),
            "keyword" | "keywords" => Ok(Self::Keywords),
            other => Err(TalonError::validation(
                "filter field",
                format!(
                    "'{}' (expected severity, product, hostname, status, or keywords)",
                    other
                ),
            )),
        }
    }
}

impl FilterConfig {
    /// True when no criterion is configured
    pub fn is_empty(&self) -> bool {
        self.min_severity.is_none()
            && self.products.is_empty()
            && self.hostnames.is_empty()
            && self.statuses.is_empty()
            && self.keywords.is_empty()
    }

    pub fn with_min_severity(mut self, severity: u8) -> Self {
        self.min_severity = Some(severity.min(MAX_SEVERITY));
        self
    }

    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.products = normalize_set(products);
        self
    }

    pub fn with_hostnames<I, S>(mut self, hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hostnames = normalize_set(hostnames);
        self
    }

    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.statuses = normalize_set(statuses);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = normalize_set(keywords).into_iter().collect();
        self
    }

    /// Set one criterion from operator text
    ///
    /// List-valued fields take comma-separated values. Non-numeric or
    /// out-of-range severities are rejected here, so a malformed filter
    /// never reaches the ingest pipeline.
    pub fn set(&mut self, field: FilterField, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TalonError::validation(
                "filter value",
                "empty (use 'filter clear <field>' to remove a criterion)",
            ));
        }
        let items = value.split(',').map(str::trim).filter(|s| !s.is_empty());
        match field {
            FilterField::Severity => self.min_severity = Some(parse_severity(value)?),
            FilterField::Product => self.products = normalize_set(items),
            FilterField::Hostname => self.hostnames = normalize_set(items),
            FilterField::Status => self.statuses = normalize_set(items),
            FilterField::Keywords => self.keywords = normalize_set(items).into_iter().collect(),
        }
        Ok(())
    }

    /// Remove one criterion
    pub fn clear(&mut self, field: FilterField) {
        match field {
            FilterField::Severity => self.min_severity = None,
            FilterField::Product => self.products.clear(),
            FilterField::Hostname => self.hostnames.clear(),
            FilterField::Status => self.statuses.clear(),
            FilterField::Keywords => self.keywords.clear(),
        }
    }

    /// Check that a deserialized filter is within range
    pub fn validate(&self) -> Result<()> {
        if let Some(sev) = self.min_severity {
            if sev > MAX_SEVERITY {
                return Err(TalonError::validation(
                    "severity",
                    format!("{} is above {}", sev, MAX_SEVERITY),
                ));
            }
        }
        Ok(())
    }
}

/// Parse an operator-supplied minimum severity
pub fn parse_severity(value: &str) -> Result<u8> {
    let n: i64 = value
        .trim()
        .parse()
        .map_err(|_| TalonError::validation("severity", format!("'{}' is not a number", value)))?;
    if !(0..=MAX_SEVERITY as i64).contains(&n) {
        return Err(TalonError::validation(
            "severity",
            format!("{} is outside 0..={}", n, MAX_SEVERITY),
        ));
    }
    Ok(n as u8)
}

fn normalize_set<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Evaluate `filter` against `alert`
///
/// All configured criteria are AND-combined; keywords are OR-combined
/// case-insensitive substrings over hostname, product, status, name, and
/// description.
pub fn matches(alert: &Alert, filter: &FilterConfig) -> bool {
    if let Some(min) = filter.min_severity {
        if alert.severity < min {
            return false;
        }
    }

    if !in_set(&filter.products, &alert.product)
        || !in_set(&filter.hostnames, &alert.hostname)
        || !in_set(&filter.statuses, &alert.status)
    {
        return false;
    }

    if !filter.keywords.is_empty() {
        let haystacks = [
            alert.hostname.to_lowercase(),
            alert.product.to_lowercase(),
            alert.status.to_lowercase(),
            alert.name.to_lowercase(),
            alert.description.to_lowercase(),
        ];
        let hit = filter
            .keywords
            .iter()
            .map(|kw| kw.to_lowercase())
            .any(|kw| haystacks.iter().any(|h| h.contains(kw.as_str())));
        if !hit {
            return false;
        }
    }

    true
}

/// Case-insensitive on both sides; deserialized sets are not normalized
fn in_set(set: &BTreeSet<String>, value: &str) -> bool {
    if set.is_empty() {
        return true;
    }
    let value = value.to_lowercase();
    set.iter().any(|s| s.to_lowercase() == value)
}

impl fmt::Display for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let mut parts = Vec::new();
        if let Some(sev) = self.min_severity {
            parts.push(format!("severity>={}", sev));
        }
        let join = |s: &BTreeSet<String>| s.iter().cloned().collect::<Vec<_>>().join(",");
        if !self.products.is_empty() {
            parts.push(format!("product={}", join(&self.products)));
        }
        if !self.hostnames.is_empty() {
            parts.push(format!("hostname={}", join(&self.hostnames)));
        }
        if !self.statuses.is_empty() {
            parts.push(format!("status={}", join(&self.statuses)));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("keywords={}", self.keywords.join("|")));
        }
        f.write_str(&parts.join(" "))
    }
}
