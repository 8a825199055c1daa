//! CSV and JSON export of stored alerts

use crate::error::{Result, TalonError};
use crate::store::AlertStore;
use crate::types::{Alert, AlertQuery, ExportFormat};
use bytes::Bytes;
use chrono::SecondsFormat;
use serde::Serialize;
use std::path::Path;

/// Column order shared by both formats
pub const EXPORT_COLUMNS: [&str; 6] = ["id", "timestamp", "severity", "product", "hostname", "status"];

#[derive(Serialize)]
struct ExportRecord<'a> {
    id: &'a str,
    timestamp: String,
    severity: u8,
    product: &'a str,
    hostname: &'a str,
    status: &'a str,
    raw_payload: &'a serde_json::Value,
}

impl<'a> From<&'a Alert> for ExportRecord<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            id: &alert.id,
            timestamp: alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            severity: alert.severity,
            product: &alert.product,
            hostname: &alert.hostname,
            status: &alert.status,
            raw_payload: &alert.raw_payload,
        }
    }
}

/// Render the alerts selected by `query`
pub async fn export(store: &dyn AlertStore, query: &AlertQuery, format: ExportFormat) -> Result<Bytes> {
    let alerts = store.query(query).await?;
    render(&alerts, format)
}

/// Render the alerts selected by `query` into `path`, returning how many were written
pub async fn export_to_file(
    store: &dyn AlertStore,
    query: &AlertQuery,
    format: ExportFormat,
    path: &Path,
) -> Result<usize> {
    let alerts = store.query(query).await?;
    let bytes = render(&alerts, format)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, &bytes).await.map_err(|e| {
        TalonError::Export(format!("Failed to write {}: {}", path.display(), e))
    })?;

    tracing::info!(
        path = %path.display(),
        count = alerts.len(),
        format = ?format,
        "Alerts exported"
    );
    Ok(alerts.len())
}

/// Render already-selected alerts
pub fn render(alerts: &[Alert], format: ExportFormat) -> Result<Bytes> {
    match format {
        ExportFormat::Csv => render_csv(alerts),
        ExportFormat::Json => {
            let records: Vec<ExportRecord<'_>> = alerts.iter().map(ExportRecord::from).collect();
            Ok(Bytes::from(serde_json::to_vec_pretty(&records)?))
        }
    }
}

fn render_csv(alerts: &[Alert]) -> Result<Bytes> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_COLUMNS)?;

    for alert in alerts {
        let record = ExportRecord::from(alert);
        let severity = record.severity.to_string();
        writer.write_record([
            record.id,
            record.timestamp.as_str(),
            severity.as_str(),
            record.product,
            record.hostname,
            record.status,
        ])?;
    }

    let buf = writer
        .into_inner()
        .map_err(|e| TalonError::Export(format!("Failed to flush CSV: {}", e)))?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAlertStore;
    use chrono::{TimeZone, Utc};

    fn alert(id: &str, hostname: &str) -> Alert {
        Alert {
            id: id.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 8, 24, 17, 21, 55).unwrap(),
            severity: 70,
            product: "epp".into(),
            hostname: hostname.into(),
            status: "new".into(),
            name: "x".into(),
            description: String::new(),
            raw_payload: serde_json::json!({"id": id, "extra": [1, 2]}),
        }
    }

    #[test]
    fn test_csv_header_and_rows() {
        let bytes = render(&[alert("a", "ws-01")], ExportFormat::Csv).unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,timestamp,severity,product,hostname,status"));
        assert_eq!(lines.next(), Some("a,2025-08-24T17:21:55Z,70,epp,ws-01,new"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_csv_quotes_embedded_commas() {
        let bytes = render(&[alert("a", "host,with,commas")], ExportFormat::Csv).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_ref());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[4], "host,with,commas");
    }

    #[test]
    fn test_csv_empty_has_header_only() {
        let bytes = render(&[], ExportFormat::Csv).unwrap();
        assert_eq!(
            String::from_utf8(bytes.to_vec()).unwrap(),
            "id,timestamp,severity,product,hostname,status\n"
        );
    }

    #[test]
    fn test_json_includes_raw_payload() {
        let bytes = render(&[alert("a", "ws-01")], ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let first = &value[0];
        assert_eq!(first["id"], "a");
        assert_eq!(first["severity"], 70);
        assert_eq!(first["raw_payload"]["extra"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_export_to_file() {
        let store = MemoryAlertStore::new();
        store.upsert(&alert("a", "ws-01")).await.unwrap();
        store.upsert(&alert("b", "ws-02")).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("alerts.json");
        let written = export_to_file(&store, &AlertQuery::all(), ExportFormat::Json, &path)
            .await
            .unwrap();
        assert_eq!(written, 2);

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }
}
