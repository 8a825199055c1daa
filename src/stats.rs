//! On-demand alert statistics

use crate::error::Result;
use crate::store::AlertStore;
use crate::types::{Alert, AlertQuery, DateRange};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Alert counts for one day (or for the whole store)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub count: u64,
    /// Severity → number of alerts
    pub severity_breakdown: BTreeMap<u8, u64>,
    /// Product → number of alerts
    pub product_breakdown: BTreeMap<String, u64>,
}

impl DailySummary {
    fn record(&mut self, alert: &Alert) {
        self.count += 1;
        *self.severity_breakdown.entry(alert.severity).or_insert(0) += 1;
        let product = if alert.product.is_empty() {
            "unknown".to_string()
        } else {
            alert.product.clone()
        };
        *self.product_breakdown.entry(product).or_insert(0) += 1;
    }
}

/// Per-day summaries for every day in `range`
///
/// Days without alerts are present with a zero count.
pub async fn daily_summary(
    store: &dyn AlertStore,
    range: DateRange,
) -> Result<BTreeMap<NaiveDate, DailySummary>> {
    let mut days: BTreeMap<NaiveDate, DailySummary> = range
        .first
        .iter_days()
        .take_while(|d| *d <= range.last)
        .map(|d| (d, DailySummary::default()))
        .collect();

    let alerts = store
        .query(&AlertQuery::all().with_range(range.to_time_range()))
        .await?;
    for alert in &alerts {
        days.entry(alert.day()).or_default().record(alert);
    }

    tracing::debug!(
        first = %range.first,
        last = %range.last,
        alerts = alerts.len(),
        "Daily summary computed"
    );
    Ok(days)
}

/// Summary over every stored alert
pub async fn overall_summary(store: &dyn AlertStore) -> Result<DailySummary> {
    let mut summary = DailySummary::default();
    for alert in &store.query(&AlertQuery::all()).await? {
        summary.record(alert);
    }
    Ok(summary)
}
