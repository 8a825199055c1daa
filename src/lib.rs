//! # talon
//!
//! Interactive CrowdStrike Falcon alert monitor with local persistence,
//! export, and statistics.
//!
//! ## Overview
//!
//! `talon` polls the Falcon alerts API on a fixed interval, filters what it
//! fetches, and upserts matching alerts into a local SQLite store keyed by
//! alert id. A per-profile cursor is advanced in the same transaction as the
//! batch it describes, so a restart never skips alerts that were not stored.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use talon::{IngestPipeline, PollerSettings, SessionManager, SqliteAlertStore};
//! use talon::secret::PlainSecretProvider;
//! use talon::source::falcon::{FalconClient, FalconConfig};
//!
//! # async fn example(profile: talon::ConnectionProfile) -> talon::Result<()> {
//! let falcon = Arc::new(FalconClient::new(FalconConfig::default())?);
//! let sessions = Arc::new(SessionManager::new(falcon.clone(), Arc::new(PlainSecretProvider)));
//! let store = Arc::new(SqliteAlertStore::open("alerts.db").await?);
//! let pipeline = Arc::new(IngestPipeline::new(falcon, store, sessions.clone()));
//!
//! let session = sessions.authenticate(&profile).await?;
//! let poller = pipeline.spawn(session, PollerSettings::default())?;
//! poller.stop().await;
//! poller.join().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AlertSource** trait: paginated remote alert API (Falcon, in-memory)
//! - **AlertStore** trait: idempotent upsert + cursor persistence (SQLite, in-memory)
//! - **IngestPipeline**: poll state machine, dedup, filter, atomic ingest
//! - **SessionManager**: token issue and refresh through an `Authenticator`
//! - **SecretProvider** trait: how client secrets are sealed at rest

pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod pipeline;
pub mod profiles;
pub mod render;
pub mod repl;
pub mod retry;
pub mod secret;
pub mod session;
pub mod source;
pub mod stats;
pub mod store;
pub mod types;

// Re-export core types
pub use config::{FileProfileStore, MemoryProfileStore, ProfileStore, Settings, TalonConfig};
pub use error::{Result, TalonError};
pub use filter::{FilterConfig, FilterField};
pub use pipeline::{
    CycleReport, IngestPipeline, PollState, PollerEvent, PollerHandle, PollerSettings,
};
pub use retry::RetryPolicy;
pub use session::{Authenticator, Session, SessionManager};
pub use source::{AlertSource, FetchCursor, Page};
pub use stats::{daily_summary, overall_summary, DailySummary};
pub use store::{AlertStore, MemoryAlertStore, SqliteAlertStore};
pub use types::{
    Alert, AlertQuery, ConnectionProfile, DateRange, ExportFormat, OutputFormat, PageToken,
    PollCursor, TimeRange, UpsertOutcome,
};
