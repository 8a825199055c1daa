//! Secret sealing for stored connection profiles
//!
//! The ingest core only ever asks a `SecretProvider` to reveal a sealed
//! client secret right before authenticating; how secrets are protected at
//! rest is up to the provider.

use crate::error::{Result, TalonError};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Seals and reveals client secrets
pub trait SecretProvider: Send + Sync {
    /// Turn a plaintext secret into its stored form
    fn seal(&self, plaintext: &str) -> Result<String>;

    /// Recover the plaintext from its stored form
    fn reveal(&self, sealed: &str) -> Result<String>;

    /// Provider name, for diagnostics
    fn name(&self) -> &str;
}

/// Stores secrets as-is
///
/// Suitable for tests and for operators who protect the config file by
/// other means.
#[derive(Debug, Default, Clone)]
pub struct PlainSecretProvider;

impl SecretProvider for PlainSecretProvider {
    fn seal(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn reveal(&self, sealed: &str) -> Result<String> {
        Ok(sealed.to_string())
    }

    fn name(&self) -> &str {
        "plain"
    }
}

/// Sealed secret envelope, serialized to JSON then base64
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEnvelope {
    /// Base64-encoded 96-bit nonce
    nonce: String,
    /// Base64-encoded ciphertext
    ciphertext: String,
}

/// AES-256-GCM secret provider backed by a local key file
pub struct AesGcmSecretProvider {
    cipher: Aes256Gcm,
}

impl AesGcmSecretProvider {
    /// Create a provider from a raw 32-byte key
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Load the key from `path`, generating and writing a new one if absent
    pub fn from_key_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path)?;
            let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
                TalonError::Secret(format!("Invalid key file {}: {}", path.display(), e))
            })?;
            let key: [u8; 32] = bytes.try_into().map_err(|_| {
                TalonError::Secret(format!("Key file {} is not 32 bytes", path.display()))
            })?;
            return Ok(Self::new(&key));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = Aes256Gcm::generate_key(&mut OsRng);
        std::fs::write(path, BASE64.encode(key))?;
        restrict_permissions(path)?;
        tracing::info!(path = %path.display(), "Generated new secret key");

        Ok(Self {
            cipher: Aes256Gcm::new(&key),
        })
    }
}

/// Make `path` readable and writable by the owner only
#[cfg(unix)]
pub(crate) fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl SecretProvider for AesGcmSecretProvider {
    fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| TalonError::Secret(format!("Encryption failed: {}", e)))?;

        let envelope = SealedEnvelope {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        };
        Ok(BASE64.encode(serde_json::to_vec(&envelope)?))
    }

    fn reveal(&self, sealed: &str) -> Result<String> {
        let json = BASE64
            .decode(sealed)
            .map_err(|e| TalonError::Secret(format!("Invalid sealed secret encoding: {}", e)))?;
        let envelope: SealedEnvelope = serde_json::from_slice(&json)?;

        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| TalonError::Secret(format!("Invalid nonce encoding: {}", e)))?;
        if nonce_bytes.len() != 12 {
            return Err(TalonError::Secret("Nonce must be 12 bytes".into()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| TalonError::Secret(format!("Invalid ciphertext encoding: {}", e)))?;

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| TalonError::Secret(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| TalonError::Secret(format!("Secret is not UTF-8: {}", e)))
    }

    fn name(&self) -> &str {
        "aes-256-gcm"
    }
}

/// Mask a secret for display, keeping two characters at each end
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 6 => "*".repeat(n),
        n => {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[n - 2..].iter().collect();
            format!("{}{}{}", head, "*".repeat(n - 4), tail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_provider_is_identity() {
        let p = PlainSecretProvider;
        assert_eq!(p.reveal(&p.seal("s3cr3t").unwrap()).unwrap(), "s3cr3t");
    }

    #[test]
    fn test_aes_seal_reveal() {
        let p = AesGcmSecretProvider::new(&[0x42; 32]);
        let sealed = p.seal("falcon-client-secret").unwrap();
        assert!(!sealed.contains("falcon-client-secret"));
        assert_eq!(p.reveal(&sealed).unwrap(), "falcon-client-secret");
    }

    #[test]
    fn test_each_seal_uses_fresh_nonce() {
        let p = AesGcmSecretProvider::new(&[0x42; 32]);
        assert_ne!(p.seal("same").unwrap(), p.seal("same").unwrap());
    }

    #[test]
    fn test_reveal_with_wrong_key_fails() {
        let sealed = AesGcmSecretProvider::new(&[0x42; 32]).seal("x").unwrap();
        let other = AesGcmSecretProvider::new(&[0x7A; 32]);
        assert!(matches!(other.reveal(&sealed), Err(TalonError::Secret(_))));
    }

    #[test]
    fn test_reveal_garbage_fails() {
        let p = AesGcmSecretProvider::new(&[0x42; 32]);
        assert!(p.reveal("not base64 !!").is_err());
    }

    #[test]
    fn test_key_file_generated_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secret.key");

        let first = AesGcmSecretProvider::from_key_file(&path).unwrap();
        assert!(path.exists());
        let sealed = first.seal("abc").unwrap();

        let second = AesGcmSecretProvider::from_key_file(&path).unwrap();
        assert_eq!(second.reveal(&sealed).unwrap(), "abc");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("abcdef"), "******");
        assert_eq!(mask_secret("abcdefgh"), "ab****gh");
    }
}
