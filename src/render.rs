//! Terminal rendering for alerts, statistics, and profiles

use crate::error::Result;
use crate::pipeline::CycleReport;
use crate::secret::mask_secret;
use crate::stats::DailySummary;
use crate::types::{Alert, ConnectionProfile, OutputFormat};
use chrono::{DateTime, NaiveDate, Utc};
use colored::{Color, Colorize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const LOGO: &str = r"
████████╗ █████╗ ██╗      ██████╗ ███╗   ██╗
╚══██╔══╝██╔══██╗██║     ██╔═══██╗████╗  ██║
   ██║   ███████║██║     ██║   ██║██╔██╗ ██║
   ██║   ██╔══██║██║     ██║   ██║██║╚██╗██║
   ██║   ██║  ██║███████╗╚██████╔╝██║ ╚████║
   ╚═╝   ╚═╝  ╚═╝╚══════╝ ╚═════╝ ╚═╝  ╚═══╝";

/// Color for a severity: red from 60, blue from 30, green below
pub fn severity_color(severity: u8) -> Color {
    match severity {
        60.. => Color::Red,
        30..=59 => Color::Blue,
        _ => Color::Green,
    }
}

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn product_label(alert: &Alert) -> String {
    if alert.product.is_empty() {
        "UNKNOWN".to_string()
    } else {
        alert.product.to_uppercase()
    }
}

fn display_name(alert: &Alert) -> &str {
    if alert.name.is_empty() {
        "Alert"
    } else {
        &alert.name
    }
}

/// One-line alert summary without color codes
pub fn plain_alert_line(alert: &Alert) -> String {
    format!(
        "[{}] [{}] sev={} status={} id={} host={} :: {}",
        fmt_ts(alert.timestamp),
        product_label(alert),
        alert.severity,
        or_dash(&alert.status),
        alert.id,
        or_dash(&alert.hostname),
        display_name(alert),
    )
}

/// One-line colored alert summary
pub fn alert_line(alert: &Alert) -> String {
    format!(
        "[{}] [{}] sev={} status={} id={} host={} :: {}",
        fmt_ts(alert.timestamp),
        product_label(alert).green(),
        alert.severity.to_string().color(severity_color(alert.severity)),
        or_dash(&alert.status).yellow().bold(),
        alert.id.blue(),
        or_dash(&alert.hostname).cyan(),
        display_name(alert).bold(),
    )
}

/// Alert as printed while watching, plus the line written to the alert log
pub fn render_alert(alert: &Alert, format: OutputFormat) -> Result<(String, String)> {
    match format {
        OutputFormat::Console => Ok((
            alert_line(alert),
            format!("{} | {}", fmt_ts(alert.timestamp), plain_alert_line(alert)),
        )),
        OutputFormat::Json => {
            let json = serde_json::to_string(&alert.raw_payload)?;
            Ok((json.clone(), json))
        }
    }
}

/// Multi-line detail view
pub fn detail_view(alert: &Alert) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} {}", "Alert Details:".bold(), alert.id);
    let _ = writeln!(out, "{}", "=".repeat(50));

    let raw = &alert.raw_payload;
    let updated = raw
        .get("updated_timestamp")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let device_id = raw
        .get("device")
        .and_then(|d| d.get("device_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let severity = alert.severity.to_string();
    let created = fmt_ts(alert.timestamp);

    let fields: [(&str, &str); 9] = [
        ("Name", &alert.name),
        ("Description", &alert.description),
        ("Severity", &severity),
        ("Status", &alert.status),
        ("Product", &alert.product),
        ("Created", &created),
        ("Updated", updated),
        ("Hostname", &alert.hostname),
        ("Device ID", device_id),
    ];
    for (label, value) in fields {
        if !value.is_empty() {
            let _ = writeln!(out, "{:12}: {}", label, value);
        }
    }
    out
}

/// Summary block for one day or for the whole store
pub fn summary_view(title: &str, summary: &DailySummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", title.bold());
    let _ = writeln!(out, "Total alerts: {}", summary.count);

    if !summary.severity_breakdown.is_empty() {
        let _ = writeln!(out, "\nBy Severity:");
        for (sev, count) in summary.severity_breakdown.iter().rev() {
            let _ = writeln!(
                out,
                "  {}: {}",
                format!("{:>3}", sev).color(severity_color(*sev)),
                count
            );
        }
    }
    if !summary.product_breakdown.is_empty() {
        let _ = writeln!(out, "\nBy Product:");
        for (product, count) in &summary.product_breakdown {
            let _ = writeln!(out, "  {}: {}", product, count);
        }
    }
    out
}

/// Summary blocks for a range of days
pub fn daily_view(days: &BTreeMap<NaiveDate, DailySummary>) -> String {
    days.iter()
        .map(|(day, summary)| summary_view(&format!("Alert Statistics for {}", day), summary))
        .collect()
}

pub fn cycle_line(report: &CycleReport) -> String {
    format!(
        "[+] cycle: fetched {}, matched {}, new {}, updated {}",
        report.fetched, report.matched, report.inserted, report.updated
    )
}

/// Profile details with the secret masked
pub fn profile_view(profile: &ConnectionProfile, secret: Option<&str>) -> String {
    let secret = secret.map(mask_secret).unwrap_or_else(|| "(sealed)".to_string());
    format!(
        "{}\n  client_id: {}\n  client_secret: {}\n  base_url: {}\n  created_at: {}",
        format!("Connection [{}] details:", profile.id).yellow().bold(),
        profile.client_id,
        secret,
        profile.base_url,
        fmt_ts(profile.created_at),
    )
}

pub fn banner() -> String {
    let mut lines: Vec<&str> = LOGO.lines().skip_while(|l| l.is_empty()).collect();
    let last = lines.pop().unwrap_or_default();
    let mut out = String::from("\n");
    for line in lines {
        let _ = writeln!(out, "{}", line.white());
    }
    let _ = writeln!(
        out,
        "{} {}\n",
        last.white(),
        env!("CARGO_PKG_VERSION").white().bold()
    );
    out
}

/// Append-only log of displayed alerts
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line, creating the file if needed
    pub async fn append(&self, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert() -> Alert {
        Alert {
            id: "ind:abc".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 8, 24, 17, 21, 55).unwrap(),
            severity: 70,
            product: "epp".into(),
            hostname: String::new(),
            status: "new".into(),
            name: "CredentialDumping".into(),
            description: String::new(),
            raw_payload: serde_json::json!({"id": "ind:abc", "device": {"device_id": "d-1"}}),
        }
    }

    #[test]
    fn test_severity_color_thresholds() {
        assert_eq!(severity_color(100), Color::Red);
        assert_eq!(severity_color(60), Color::Red);
        assert_eq!(severity_color(59), Color::Blue);
        assert_eq!(severity_color(30), Color::Blue);
        assert_eq!(severity_color(29), Color::Green);
        assert_eq!(severity_color(0), Color::Green);
    }

    #[test]
    fn test_plain_alert_line() {
        assert_eq!(
            plain_alert_line(&alert()),
            "[2025-08-24 17:21:55 UTC] [EPP] sev=70 status=new id=ind:abc host=- :: CredentialDumping"
        );
    }

    #[test]
    fn test_console_log_line_uses_alert_timestamp() {
        let (_, logged) = render_alert(&alert(), OutputFormat::Console).unwrap();
        assert_eq!(
            logged,
            "2025-08-24 17:21:55 UTC | [2025-08-24 17:21:55 UTC] [EPP] sev=70 status=new id=ind:abc host=- :: CredentialDumping"
        );
    }

    #[test]
    fn test_render_alert_json_is_raw_payload() {
        let (shown, logged) = render_alert(&alert(), OutputFormat::Json).unwrap();
        assert_eq!(shown, logged);
        let value: serde_json::Value = serde_json::from_str(&shown).unwrap();
        assert_eq!(value["id"], "ind:abc");
    }

    #[test]
    fn test_detail_view_skips_empty_fields() {
        let view = detail_view(&alert());
        assert!(view.contains("Device ID   : d-1"));
        assert!(!view.contains("Hostname"));
        assert!(!view.contains("Description"));
    }

    #[test]
    fn test_profile_view_masks_secret() {
        let profile = ConnectionProfile {
            id: "abc".into(),
            client_id: "cid".into(),
            sealed_secret: "x".into(),
            base_url: "https://x".into(),
            created_at: Utc::now(),
        };
        let view = profile_view(&profile, Some("supersecret"));
        assert!(view.contains("su*******et"));
        assert!(!view.contains("supersecret"));
    }

    #[tokio::test]
    async fn test_alert_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::new(dir.path().join("alerts.log"));
        log.append("one").await.unwrap();
        log.append("two").await.unwrap();
        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "one\ntwo\n");
    }
}
