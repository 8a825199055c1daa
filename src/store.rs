//! Local alert store
//!
//! `AlertStore` is the persistence seam for the ingest pipeline and the
//! readers (detail, stats, export). Two implementations:
//!
//! - `SqliteAlertStore`: durable, single-file SQLite database in WAL mode
//! - `MemoryAlertStore`: in-process, for tests and throwaway sessions
//!
//! Upserts are keyed by alert id. `ingest` persists a batch and advances the
//! poll cursor in one transaction: either both land or neither does.

use crate::error::{Result, TalonError};
use crate::filter;
use crate::types::{Alert, AlertQuery, PageToken, PollCursor, QueryOrder, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Persistence for alerts and poll cursors
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert or replace one alert by id
    async fn upsert(&self, alert: &Alert) -> Result<UpsertOutcome>;

    /// Upsert a batch and, if given, save `cursor` in the same transaction
    ///
    /// Returns one outcome per alert, in batch order.
    async fn ingest(
        &self,
        batch: &[Alert],
        cursor: Option<&PollCursor>,
    ) -> Result<Vec<UpsertOutcome>>;

    /// Fetch one alert by id
    async fn get(&self, id: &str) -> Result<Option<Alert>>;

    /// Alerts matching the query's range, filter, order, and limit
    async fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>>;

    /// Number of stored alerts
    async fn count(&self) -> Result<u64>;

    /// Delete every stored alert, returning how many were removed
    async fn purge(&self) -> Result<u64>;

    /// Poll cursor for a profile, if one was ever saved
    async fn load_cursor(&self, profile_id: &str) -> Result<Option<PollCursor>>;

    /// Save a poll cursor outside of an ingest
    async fn save_cursor(&self, cursor: &PollCursor) -> Result<()>;

    /// Forget every poll cursor, returning how many were removed
    async fn reset_cursors(&self) -> Result<u64>;

    /// Store name, for diagnostics
    fn name(&self) -> &str;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS alerts (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        severity INTEGER NOT NULL,
        product TEXT NOT NULL,
        hostname TEXT NOT NULL,
        status TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        raw_payload TEXT NOT NULL,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(timestamp);
    CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
    CREATE TABLE IF NOT EXISTS cursors (
        profile_id TEXT PRIMARY KEY,
        watermark TEXT NOT NULL,
        page_token TEXT,
        updated_at TEXT NOT NULL
    );
";

const ALERT_COLUMNS: &str =
    "id, timestamp, severity, product, hostname, status, name, description, raw_payload";

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed alert store
///
/// Each operation opens its own connection on the blocking pool. With WAL
/// enabled, readers proceed while a batch is being written.
#[derive(Clone)]
pub struct SqliteAlertStore {
    path: Arc<PathBuf>,
}

impl SqliteAlertStore {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            path: Arc::new(path),
        };
        store
            .with_conn(|conn| {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        tracing::debug!(path = %store.path.display(), "Alert store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| TalonError::Storage(format!("store task failed: {}", e)))?
    }
}

fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TalonError::Storage(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Fixed-width UTC timestamp, so lexical order equals time order
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Column values read back from the alerts table
struct AlertRow {
    id: String,
    timestamp: String,
    severity: i64,
    product: String,
    hostname: String,
    status: String,
    name: String,
    description: String,
    raw_payload: String,
}

impl AlertRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            severity: row.get(2)?,
            product: row.get(3)?,
            hostname: row.get(4)?,
            status: row.get(5)?,
            name: row.get(6)?,
            description: row.get(7)?,
            raw_payload: row.get(8)?,
        })
    }

    fn into_alert(self) -> Result<Alert> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                TalonError::Storage(format!("corrupt timestamp for {}: {}", self.id, e))
            })?;
        let raw_payload = serde_json::from_str(&self.raw_payload).map_err(|e| {
            TalonError::Storage(format!("corrupt payload for {}: {}", self.id, e))
        })?;
        Ok(Alert {
            id: self.id,
            timestamp,
            severity: self.severity.clamp(0, u8::MAX as i64) as u8,
            product: self.product,
            hostname: self.hostname,
            status: self.status,
            name: self.name,
            description: self.description,
            raw_payload,
        })
    }
}

fn select_alert(conn: &Connection, id: &str) -> Result<Option<Alert>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
            params![id],
            AlertRow::from_row,
        )
        .optional()?;
    row.map(AlertRow::into_alert).transpose()
}

fn upsert_in(conn: &Connection, alert: &Alert, now: &str) -> Result<UpsertOutcome> {
    let existing = select_alert(conn, &alert.id)?;
    if existing.as_ref() == Some(alert) {
        return Ok(UpsertOutcome::Unchanged);
    }

    let raw = serde_json::to_string(&alert.raw_payload)?;
    let outcome = if existing.is_some() {
        conn.execute(
            "UPDATE alerts SET timestamp = ?2, severity = ?3, product = ?4, hostname = ?5,
                 status = ?6, name = ?7, description = ?8, raw_payload = ?9, last_seen = ?10
             WHERE id = ?1",
            params![
                alert.id,
                ts(alert.timestamp),
                alert.severity,
                alert.product,
                alert.hostname,
                alert.status,
                alert.name,
                alert.description,
                raw,
                now,
            ],
        )?;
        UpsertOutcome::Updated
    } else {
        conn.execute(
            "INSERT INTO alerts (id, timestamp, severity, product, hostname, status, name,
                 description, raw_payload, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                alert.id,
                ts(alert.timestamp),
                alert.severity,
                alert.product,
                alert.hostname,
                alert.status,
                alert.name,
                alert.description,
                raw,
                now,
            ],
        )?;
        UpsertOutcome::Inserted
    };
    Ok(outcome)
}

fn save_cursor_in(conn: &Connection, cursor: &PollCursor) -> Result<()> {
    conn.execute(
        "INSERT INTO cursors (profile_id, watermark, page_token, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(profile_id) DO UPDATE SET
             watermark = excluded.watermark,
             page_token = excluded.page_token,
             updated_at = excluded.updated_at",
        params![
            cursor.profile_id,
            ts(cursor.watermark),
            cursor.page_token.as_ref().map(PageToken::as_str),
            ts(cursor.updated_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn upsert(&self, alert: &Alert) -> Result<UpsertOutcome> {
        let alert = alert.clone();
        self.with_conn(move |conn| upsert_in(conn, &alert, &ts(Utc::now())))
            .await
    }

    async fn ingest(
        &self,
        batch: &[Alert],
        cursor: Option<&PollCursor>,
    ) -> Result<Vec<UpsertOutcome>> {
        let batch = batch.to_vec();
        let cursor = cursor.cloned();
        let outcomes = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let now = ts(Utc::now());
                let mut outcomes = Vec::with_capacity(batch.len());
                for alert in &batch {
                    outcomes.push(upsert_in(&tx, alert, &now)?);
                }
                if let Some(cursor) = &cursor {
                    save_cursor_in(&tx, cursor)?;
                }
                tx.commit()?;
                Ok(outcomes)
            })
            .await?;

        tracing::debug!(
            batch = outcomes.len(),
            inserted = outcomes.iter().filter(|o| **o == UpsertOutcome::Inserted).count(),
            updated = outcomes.iter().filter(|o| **o == UpsertOutcome::Updated).count(),
            "Batch ingested"
        );
        Ok(outcomes)
    }

    async fn get(&self, id: &str) -> Result<Option<Alert>> {
        let id = id.to_string();
        self.with_conn(move |conn| select_alert(conn, &id)).await
    }

    async fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {} FROM alerts", ALERT_COLUMNS);
            let mut args: Vec<String> = Vec::new();
            if let Some(range) = &query.range {
                sql.push_str(" WHERE timestamp >= ?1 AND timestamp < ?2");
                args.push(ts(range.start));
                args.push(ts(range.end));
            }
            sql.push_str(match query.order {
                QueryOrder::NewestFirst => " ORDER BY timestamp DESC, id DESC",
                QueryOrder::OldestFirst => " ORDER BY timestamp ASC, id ASC",
            });

            let active_filter = query.filter.as_ref().filter(|f| !f.is_empty());
            // Without a Rust-side filter the limit can go straight to SQLite
            if let (Some(limit), None) = (query.limit, active_filter) {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), AlertRow::from_row)?;

            let mut alerts = Vec::new();
            for row in rows {
                let alert = row?.into_alert()?;
                if active_filter.map_or(true, |f| filter::matches(&alert, f)) {
                    alerts.push(alert);
                    if query.limit.is_some_and(|l| alerts.len() >= l) {
                        break;
                    }
                }
            }
            Ok(alerts)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    async fn purge(&self) -> Result<u64> {
        let removed = self
            .with_conn(|conn| Ok(conn.execute("DELETE FROM alerts", [])? as u64))
            .await?;
        tracing::info!(removed, "Alert store purged");
        Ok(removed)
    }

    async fn load_cursor(&self, profile_id: &str) -> Result<Option<PollCursor>> {
        let profile_id = profile_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT profile_id, watermark, page_token, updated_at
                     FROM cursors WHERE profile_id = ?1",
                    params![profile_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(profile_id, watermark, page_token, updated_at)| {
                let parse = |s: &str| {
                    DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            TalonError::Storage(format!("corrupt cursor for {}: {}", profile_id, e))
                        })
                };
                Ok(PollCursor {
                    watermark: parse(&watermark)?,
                    updated_at: parse(&updated_at)?,
                    page_token: page_token.map(PageToken::new),
                    profile_id: profile_id.clone(),
                })
            })
            .transpose()
        })
        .await
    }

    async fn save_cursor(&self, cursor: &PollCursor) -> Result<()> {
        let cursor = cursor.clone();
        self.with_conn(move |conn| save_cursor_in(conn, &cursor)).await
    }

    async fn reset_cursors(&self) -> Result<u64> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM cursors", [])? as u64))
            .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[derive(Default)]
struct MemoryState {
    alerts: HashMap<String, Alert>,
    cursors: HashMap<String, PollCursor>,
}

impl MemoryState {
    fn upsert(&mut self, alert: &Alert) -> UpsertOutcome {
        match self.alerts.get(&alert.id) {
            Some(existing) if existing == alert => UpsertOutcome::Unchanged,
            Some(_) => {
                self.alerts.insert(alert.id.clone(), alert.clone());
                UpsertOutcome::Updated
            }
            None => {
                self.alerts.insert(alert.id.clone(), alert.clone());
                UpsertOutcome::Inserted
            }
        }
    }
}

/// In-memory alert store
///
/// Alerts and cursors share one lock, so `ingest` is atomic with respect to
/// every other operation.
#[derive(Default)]
pub struct MemoryAlertStore {
    state: RwLock<MemoryState>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn upsert(&self, alert: &Alert) -> Result<UpsertOutcome> {
        Ok(self.state.write().await.upsert(alert))
    }

    async fn ingest(
        &self,
        batch: &[Alert],
        cursor: Option<&PollCursor>,
    ) -> Result<Vec<UpsertOutcome>> {
        let mut state = self.state.write().await;
        let outcomes = batch.iter().map(|a| state.upsert(a)).collect();
        if let Some(cursor) = cursor {
            state
                .cursors
                .insert(cursor.profile_id.clone(), cursor.clone());
        }
        Ok(outcomes)
    }

    async fn get(&self, id: &str) -> Result<Option<Alert>> {
        Ok(self.state.read().await.alerts.get(id).cloned())
    }

    async fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| query.range.map_or(true, |r| r.contains(a.timestamp)))
            .filter(|a| query.filter.as_ref().map_or(true, |f| filter::matches(a, f)))
            .cloned()
            .collect();

        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if query.order == QueryOrder::NewestFirst {
            alerts.reverse();
        }
        if let Some(limit) = query.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.read().await.alerts.len() as u64)
    }

    async fn purge(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let removed = state.alerts.len() as u64;
        state.alerts.clear();
        Ok(removed)
    }

    async fn load_cursor(&self, profile_id: &str) -> Result<Option<PollCursor>> {
        Ok(self.state.read().await.cursors.get(profile_id).cloned())
    }

    async fn save_cursor(&self, cursor: &PollCursor) -> Result<()> {
        self.state
            .write()
            .await
            .cursors
            .insert(cursor.profile_id.clone(), cursor.clone());
        Ok(())
    }

    async fn reset_cursors(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let removed = state.cursors.len() as u64;
        state.cursors.clear();
        Ok(removed)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterConfig;
    use crate::types::TimeRange;
    use chrono::TimeZone;

    fn alert(id: &str, minute: u32, severity: u8, status: &str) -> Alert {
        Alert {
            id: id.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 8, 24, 12, minute, 0).unwrap(),
            severity,
            product: "epp".into(),
            hostname: "ws-01".into(),
            status: status.into(),
            name: format!("alert {}", id),
            description: String::new(),
            raw_payload: serde_json::json!({"id": id, "status": status}),
        }
    }

    async fn sqlite() -> (tempfile::TempDir, SqliteAlertStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAlertStore::open(dir.path().join("alerts.db"))
            .await
            .unwrap();
        (dir, store)
    }

    async fn check_upsert_is_idempotent(store: &dyn AlertStore) {
        let a = alert("a", 1, 50, "new");
        assert_eq!(store.upsert(&a).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&a).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.count().await.unwrap(), 1);

        let closed = alert("a", 1, 50, "closed");
        assert_eq!(store.upsert(&closed).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap().unwrap().status, "closed");
    }

    async fn check_query(store: &dyn AlertStore) {
        store
            .ingest(
                &[
                    alert("a", 1, 10, "new"),
                    alert("b", 2, 30, "new"),
                    alert("c", 3, 90, "closed"),
                ],
                None,
            )
            .await
            .unwrap();

        let newest = store.query(&AlertQuery::all()).await.unwrap();
        assert_eq!(newest.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), ["c", "b", "a"]);

        let oldest = store
            .query(&AlertQuery::all().oldest_first().with_limit(2))
            .await
            .unwrap();
        assert_eq!(oldest.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        let filtered = store
            .query(
                &AlertQuery::all()
                    .with_filter(FilterConfig::default().with_min_severity(30))
                    .with_limit(1),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "c");

        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 8, 24, 12, 2, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 8, 24, 12, 3, 0).unwrap(),
        );
        let ranged = store.query(&AlertQuery::all().with_range(range)).await.unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].id, "b");
    }

    async fn check_cursor_roundtrip(store: &dyn AlertStore) {
        assert!(store.load_cursor("p1").await.unwrap().is_none());

        let mut cursor = PollCursor::new("p1", Utc.with_ymd_and_hms(2025, 8, 24, 12, 0, 0).unwrap());
        cursor.page_token = Some(PageToken::new("500"));
        store
            .ingest(&[alert("a", 1, 10, "new")], Some(&cursor))
            .await
            .unwrap();
        assert_eq!(store.load_cursor("p1").await.unwrap(), Some(cursor.clone()));

        cursor.watermark = Utc.with_ymd_and_hms(2025, 8, 24, 13, 0, 0).unwrap();
        store.save_cursor(&cursor).await.unwrap();
        assert_eq!(
            store.load_cursor("p1").await.unwrap().unwrap().watermark,
            cursor.watermark
        );

        assert_eq!(store.reset_cursors().await.unwrap(), 1);
        assert!(store.load_cursor("p1").await.unwrap().is_none());
    }

    async fn check_purge(store: &dyn AlertStore) {
        store
            .ingest(&[alert("a", 1, 10, "new"), alert("b", 2, 10, "new")], None)
            .await
            .unwrap();
        assert_eq!(store.purge().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_is_idempotent() {
        let (_dir, store) = sqlite().await;
        check_upsert_is_idempotent(&store).await;
    }

    #[tokio::test]
    async fn test_memory_upsert_is_idempotent() {
        check_upsert_is_idempotent(&MemoryAlertStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_query() {
        let (_dir, store) = sqlite().await;
        check_query(&store).await;
    }

    #[tokio::test]
    async fn test_memory_query() {
        check_query(&MemoryAlertStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_cursor_roundtrip() {
        let (_dir, store) = sqlite().await;
        check_cursor_roundtrip(&store).await;
    }

    #[tokio::test]
    async fn test_memory_cursor_roundtrip() {
        check_cursor_roundtrip(&MemoryAlertStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_purge() {
        let (_dir, store) = sqlite().await;
        check_purge(&store).await;
    }

    #[tokio::test]
    async fn test_memory_purge() {
        check_purge(&MemoryAlertStore::new()).await;
    }

    #[tokio::test]
    async fn test_ingest_reports_outcomes_in_order() {
        let (_dir, store) = sqlite().await;
        store.upsert(&alert("a", 1, 10, "new")).await.unwrap();

        let outcomes = store
            .ingest(
                &[
                    alert("a", 1, 10, "new"),
                    alert("b", 2, 10, "new"),
                    alert("a", 1, 10, "closed"),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            outcomes,
            vec![UpsertOutcome::Unchanged, UpsertOutcome::Inserted, UpsertOutcome::Updated]
        );
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");
        {
            let store = SqliteAlertStore::open(&path).await.unwrap();
            let cursor = PollCursor::new("p1", Utc.with_ymd_and_hms(2025, 8, 24, 12, 1, 0).unwrap());
            store
                .ingest(&[alert("a", 1, 10, "new")], Some(&cursor))
                .await
                .unwrap();
        }
        let reopened = SqliteAlertStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert!(reopened.load_cursor("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_preserves_subsecond_timestamps() {
        let (_dir, store) = sqlite().await;
        let mut a = alert("a", 1, 10, "new");
        a.timestamp = a.timestamp + chrono::Duration::milliseconds(123);
        store.upsert(&a).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap(), a);
        assert_eq!(store.upsert(&a).await.unwrap(), UpsertOutcome::Unchanged);
    }
}
