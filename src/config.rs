//! Configuration and connection profile persistence
//!
//! Everything an operator sets interactively (profiles, the active profile,
//! polling settings, filter) lives in one `TalonConfig`, persisted through a
//! `ProfileStore`. The file store writes `~/.talon/config.json` atomically
//! via temp file + rename.

use crate::error::{Result, TalonError};
use crate::filter::FilterConfig;
use crate::pipeline::{PollerSettings, MAX_LOOKBACK, MIN_INTERVAL};
use crate::secret::restrict_permissions;
use crate::types::{ConnectionProfile, OutputFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the home directory
const TALON_DIR: &str = ".talon";

/// Default Falcon API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.crowdstrike.com";

/// Operator-tunable settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Seconds between polling cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minutes the first fetch of a run reaches back
    #[serde(default = "default_lookback")]
    pub lookback_minutes: u64,

    #[serde(default)]
    pub filter: FilterConfig,

    /// How watched alerts are printed
    #[serde(default)]
    pub output: OutputFormat,

    /// Append every displayed alert to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// How client secrets are stored in the config file
    #[serde(default)]
    pub secret_storage: SecretStorage,
}

fn default_poll_interval() -> u64 {
    15
}
fn default_lookback() -> u64 {
    10
}

fn check_lookback(minutes: u64) -> Result<()> {
    let max = MAX_LOOKBACK.as_secs() / 60;
    if minutes > max {
        return Err(TalonError::validation(
            "lookback",
            format!("must be at most {} minutes", max),
        ));
    }
    Ok(())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lookback_minutes: default_lookback(),
            filter: FilterConfig::default(),
            output: OutputFormat::default(),
            log_file: None,
            secret_storage: SecretStorage::default(),
        }
    }
}

/// Client secret storage mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretStorage {
    /// AES-256-GCM with a key in `~/.talon/secret.key`
    #[default]
    AesGcm,
    /// Stored as entered
    Plain,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs < MIN_INTERVAL.as_secs() {
            return Err(TalonError::validation(
                "polling interval",
                format!("must be at least {}s", MIN_INTERVAL.as_secs()),
            ));
        }
        check_lookback(self.lookback_minutes)?;
        self.filter.validate()
    }

    /// Set the polling interval from operator text (seconds)
    ///
    /// Empty input restores the default.
    pub fn set_poll_interval(&mut self, value: &str) -> Result<u64> {
        let value = value.trim();
        let secs = if value.is_empty() {
            default_poll_interval()
        } else {
            value.parse::<u64>().map_err(|_| {
                TalonError::validation("polling interval", format!("'{}' is not an integer", value))
            })?
        };
        if secs < MIN_INTERVAL.as_secs() {
            return Err(TalonError::validation("polling interval", "must be >= 1"));
        }
        self.poll_interval_secs = secs;
        Ok(secs)
    }

    /// Set the lookback from operator text (minutes)
    ///
    /// Empty input restores the default.
    pub fn set_lookback(&mut self, value: &str) -> Result<u64> {
        let value = value.trim();
        let minutes = if value.is_empty() {
            default_lookback()
        } else {
            value.parse::<u64>().map_err(|_| {
                TalonError::validation("lookback", format!("'{}' is not a whole number of minutes", value))
            })?
        };
        check_lookback(minutes)?;
        self.lookback_minutes = minutes;
        Ok(minutes)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_minutes.saturating_mul(60))
    }

    /// Snapshot for a new poller run
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            interval: self.poll_interval(),
            lookback: self.lookback(),
            filter: self.filter.clone(),
        }
    }
}

/// Persisted operator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalonConfig {
    /// Connection profiles by id
    #[serde(default)]
    pub profiles: BTreeMap<String, ConnectionProfile>,

    /// Id of the selected profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,

    #[serde(default)]
    pub settings: Settings,
}

impl TalonConfig {
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if let Some(active) = &self.active {
            if !self.profiles.contains_key(active) {
                return Err(TalonError::Config(format!(
                    "active profile '{}' does not exist",
                    active
                )));
            }
        }
        Ok(())
    }
}

/// Persistence for `TalonConfig`
pub trait ProfileStore: Send + Sync {
    fn save(&self, config: &TalonConfig) -> Result<()>;

    /// Load the config, or defaults when nothing was saved yet
    fn load(&self) -> Result<TalonConfig>;
}

/// JSON file profile store
pub struct FileProfileStore {
    path: PathBuf,
}

impl FileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileStore for FileProfileStore {
    fn save(&self, config: &TalonConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TalonError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            TalonError::Config(format!(
                "Failed to write config file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        restrict_permissions(&tmp_path)?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            TalonError::Config(format!(
                "Failed to rename config file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), profiles = config.profiles.len(), "Config saved");
        Ok(())
    }

    fn load(&self) -> Result<TalonConfig> {
        if !self.path.exists() {
            return Ok(TalonConfig::default());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            TalonError::Config(format!(
                "Failed to read config file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let config: TalonConfig = serde_json::from_str(&json).map_err(|e| {
            TalonError::Config(format!(
                "Failed to parse config file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        config.validate()?;

        tracing::debug!(
            path = %self.path.display(),
            profiles = config.profiles.len(),
            "Config loaded"
        );
        Ok(config)
    }
}

/// In-memory profile store for testing
#[derive(Default)]
pub struct MemoryProfileStore {
    state: std::sync::RwLock<TalonConfig>,
}

impl ProfileStore for MemoryProfileStore {
    fn save(&self, config: &TalonConfig) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| TalonError::Config(format!("Failed to acquire config lock: {}", e)))?;
        *state = config.clone();
        Ok(())
    }

    fn load(&self) -> Result<TalonConfig> {
        let state = self
            .state
            .read()
            .map_err(|e| TalonError::Config(format!("Failed to acquire config lock: {}", e)))?;
        Ok(state.clone())
    }
}

/// `~/.talon`
pub fn talon_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(TALON_DIR))
        .ok_or_else(|| TalonError::Config("Cannot determine home directory".into()))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(talon_home()?.join("config.json"))
}

pub fn default_db_path() -> Result<PathBuf> {
    Ok(talon_home()?.join("alerts.db"))
}

pub fn default_key_path() -> Result<PathBuf> {
    Ok(talon_home()?.join("secret.key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> TalonConfig {
        let mut config = TalonConfig::default();
        config.profiles.insert(
            "abc123defg".into(),
            ConnectionProfile {
                id: "abc123defg".into(),
                client_id: "client".into(),
                sealed_secret: "sealed".into(),
                base_url: DEFAULT_BASE_URL.into(),
                created_at: Utc::now(),
            },
        );
        config.active = Some("abc123defg".into());
        config.settings.filter = FilterConfig::default().with_min_severity(30);
        config
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.poll_interval(), Duration::from_secs(15));
        assert_eq!(s.lookback(), Duration::from_secs(600));
        assert_eq!(s.output, OutputFormat::Console);
        assert_eq!(s.secret_storage, SecretStorage::AesGcm);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: TalonConfig = serde_json::from_str(r#"{"settings": {"lookback_minutes": 5}}"#).unwrap();
        assert_eq!(config.settings.poll_interval_secs, 15);
        assert_eq!(config.settings.lookback_minutes, 5);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_set_poll_interval() {
        let mut s = Settings::default();
        assert_eq!(s.set_poll_interval("30").unwrap(), 30);
        assert!(s.set_poll_interval("0").is_err());
        assert!(s.set_poll_interval("fast").is_err());
        assert_eq!(s.poll_interval_secs, 30);
        assert_eq!(s.set_poll_interval("").unwrap(), 15);
    }

    #[test]
    fn test_set_lookback() {
        let mut s = Settings::default();
        assert_eq!(s.set_lookback("0").unwrap(), 0);
        assert!(s.set_lookback("-5").is_err());
        assert_eq!(s.set_lookback(" ").unwrap(), 10);
    }

    #[test]
    fn test_set_lookback_rejects_out_of_range() {
        let mut s = Settings::default();
        let max = MAX_LOOKBACK.as_secs() / 60;
        assert_eq!(s.set_lookback(&max.to_string()).unwrap(), max);

        let err = s.set_lookback("1000000000000").unwrap_err();
        assert!(matches!(err, TalonError::Validation { .. }));
        assert!(s.set_lookback(&(max + 1).to_string()).is_err());
        assert_eq!(s.lookback_minutes, max);
    }

    #[test]
    fn test_validate_rejects_huge_lookback_from_file() {
        let config: TalonConfig =
            serde_json::from_str(r#"{"settings": {"lookback_minutes": 18446744073709551615}}"#)
                .unwrap();
        assert!(matches!(
            config.validate(),
            Err(TalonError::Validation { .. })
        ));
        // the conversion itself must not overflow
        assert_eq!(config.settings.lookback(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_mixed_case_filter_from_file_matches() {
        let config: TalonConfig = serde_json::from_str(
            r#"{"settings": {"filter": {"products": ["EPP"], "keywords": ["Mimikatz"]}}}"#,
        )
        .unwrap();
        config.validate().unwrap();

        let alert = crate::types::Alert {
            id: "a1".into(),
            timestamp: Utc::now(),
            severity: 50,
            product: "epp".into(),
            hostname: "ws-01".into(),
            status: "new".into(),
            name: "Mimikatz".into(),
            description: String::new(),
            raw_payload: serde_json::json!({}),
        };
        assert!(crate::filter::matches(&alert, &config.settings.filter));
    }

    #[test]
    fn test_validate_rejects_dangling_active() {
        let mut config = sample();
        config.active = Some("missing".into());
        assert!(matches!(config.validate(), Err(TalonError::Config(_))));
    }

    #[test]
    fn test_poller_settings_snapshot() {
        let config = sample();
        let ps = config.settings.poller_settings();
        assert_eq!(ps.interval, Duration::from_secs(15));
        assert_eq!(ps.filter.min_severity, Some(30));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryProfileStore::default();
        assert_eq!(store.load().unwrap(), TalonConfig::default());

        let config = sample();
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_file_store_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileProfileStore::new(&path);

        assert_eq!(store.load().unwrap(), TalonConfig::default());

        let config = sample();
        store.save(&config).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileProfileStore::new(&path).load(),
            Err(TalonError::Config(_))
        ));
    }
}
