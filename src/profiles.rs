//! Connection profile management
//!
//! Profiles are created with a generated 10-character id and a sealed
//! secret. Selecting or removing the active profile is reported back so the
//! caller can drop any session issued for the previous one.

use crate::config::TalonConfig;
use crate::error::{Result, TalonError};
use crate::secret::SecretProvider;
use crate::types::ConnectionProfile;
use chrono::Utc;

/// Length of generated profile ids
pub const PROFILE_ID_LEN: usize = 10;

/// Generate a profile id from `[a-z0-9]`
pub fn generate_profile_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(PROFILE_ID_LEN)
        .collect()
}

/// Outcome of changing the active profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The profile was already active; sessions stay valid
    Unchanged,
    /// The active profile changed; sessions for `previous` are stale
    Changed { previous: Option<String> },
}

fn validate_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(TalonError::validation(
            "base url",
            format!("'{}' must start with https:// or http://", base_url.trim()),
        ));
    }
    Ok(trimmed.to_string())
}

impl TalonConfig {
    /// Create a profile, seal its secret, and make it active
    pub fn create_profile(
        &mut self,
        client_id: &str,
        client_secret: &str,
        base_url: &str,
        secrets: &dyn SecretProvider,
    ) -> Result<ConnectionProfile> {
        let client_id = client_id.trim();
        let client_secret = client_secret.trim();
        if client_id.is_empty() {
            return Err(TalonError::validation("client id", "required"));
        }
        if client_secret.is_empty() {
            return Err(TalonError::validation("client secret", "required"));
        }
        let base_url = validate_base_url(base_url)?;

        let mut id = generate_profile_id();
        while self.profiles.contains_key(&id) {
            id = generate_profile_id();
        }

        let profile = ConnectionProfile {
            id: id.clone(),
            client_id: client_id.to_string(),
            sealed_secret: secrets.seal(client_secret)?,
            base_url,
            created_at: Utc::now(),
        };
        self.profiles.insert(id.clone(), profile.clone());
        self.active = Some(id);

        tracing::info!(profile = %profile.id, provider = secrets.name(), "Profile created");
        Ok(profile)
    }

    /// Profiles, oldest first
    pub fn list_profiles(&self) -> Vec<&ConnectionProfile> {
        let mut profiles: Vec<_> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    pub fn active_profile(&self) -> Option<&ConnectionProfile> {
        self.active.as_ref().and_then(|id| self.profiles.get(id))
    }

    /// Make `id` the active profile
    pub fn select_profile(&mut self, id: &str) -> Result<Selection> {
        if !self.profiles.contains_key(id) {
            return Err(TalonError::NotFound(format!("profile '{}'", id)));
        }
        if self.active.as_deref() == Some(id) {
            return Ok(Selection::Unchanged);
        }
        let previous = self.active.replace(id.to_string());
        Ok(Selection::Changed { previous })
    }

    /// Remove a profile; clears the active selection if it was active
    pub fn remove_profile(&mut self, id: &str) -> Result<(ConnectionProfile, Selection)> {
        let removed = self
            .profiles
            .remove(id)
            .ok_or_else(|| TalonError::NotFound(format!("profile '{}'", id)))?;

        let selection = if self.active.as_deref() == Some(id) {
            Selection::Changed {
                previous: self.active.take(),
            }
        } else {
            Selection::Unchanged
        };

        tracing::info!(profile = %id, "Profile removed");
        Ok((removed, selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{AesGcmSecretProvider, PlainSecretProvider};

    #[test]
    fn test_generated_ids() {
        let id = generate_profile_id();
        assert_eq!(id.len(), PROFILE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(generate_profile_id(), generate_profile_id());
    }

    #[test]
    fn test_create_seals_secret_and_activates() {
        let provider = AesGcmSecretProvider::new(&[7; 32]);
        let mut config = TalonConfig::default();

        let profile = config
            .create_profile("client", "s3cret", "https://api.crowdstrike.com/", &provider)
            .unwrap();

        assert_eq!(profile.base_url, "https://api.crowdstrike.com");
        assert_ne!(profile.sealed_secret, "s3cret");
        assert_eq!(provider.reveal(&profile.sealed_secret).unwrap(), "s3cret");
        assert_eq!(config.active_profile(), Some(&profile));
    }

    #[test]
    fn test_create_validates_input() {
        let mut config = TalonConfig::default();
        let p = PlainSecretProvider;
        assert!(config.create_profile("", "s", "https://x", &p).is_err());
        assert!(config.create_profile("c", " ", "https://x", &p).is_err());
        assert!(config.create_profile("c", "s", "api.crowdstrike.com", &p).is_err());
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_select_and_remove() {
        let p = PlainSecretProvider;
        let mut config = TalonConfig::default();
        let first = config.create_profile("a", "s", "https://x", &p).unwrap();
        let second = config.create_profile("b", "s", "https://x", &p).unwrap();
        assert_eq!(config.active.as_deref(), Some(second.id.as_str()));

        assert_eq!(config.select_profile(&second.id).unwrap(), Selection::Unchanged);
        assert_eq!(
            config.select_profile(&first.id).unwrap(),
            Selection::Changed {
                previous: Some(second.id.clone())
            }
        );
        assert!(matches!(
            config.select_profile("nope"),
            Err(TalonError::NotFound(_))
        ));

        let (_, sel) = config.remove_profile(&second.id).unwrap();
        assert_eq!(sel, Selection::Unchanged);
        let (_, sel) = config.remove_profile(&first.id).unwrap();
        assert_eq!(
            sel,
            Selection::Changed {
                previous: Some(first.id)
            }
        );
        assert!(config.active.is_none());
        assert!(config.list_profiles().is_empty());
    }
}
