//! AES-256-GCM encryption for credential tokens.
//!
//! Each token is encrypted with a unique random nonce; the nonce is
//! prepended to the ciphertext and the whole payload is base64-encoded,
//! so one stored string is self-contained.
//!
//! The cipher degrades rather than fails: with no key configured both
//! operations pass input through unchanged (with a one-time warning), and
//! decryption of values that fail authentication or format checks
//! (legacy rows written before a key was configured) returns the stored
//! value unchanged. Callers never see an error from this layer.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Once;
use tracing::warn;

use crate::error::{Error, Result};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

static MISSING_KEY_WARNING: Once = Once::new();

/// Validates that a master key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64.decode(key_base64).map_err(|e| {
        Error::Configuration(format!("failed to decode base64 encryption key: {}", e))
    })?;

    if key_bytes.len() != KEY_SIZE {
        return Err(Error::Configuration(format!(
            "encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

/// Symmetric cipher for token material at rest.
///
/// Constructed once from configuration and shared read-only; requires no
/// synchronization.
#[derive(Clone)]
pub struct TokenCipher {
    key: Option<Vec<u8>>,
}

impl TokenCipher {
    /// Creates a cipher from an optional base64-encoded 32-byte key.
    ///
    /// `None` yields a pass-through cipher (tokens stored unencrypted).
    /// An invalid key is a configuration error; a supplied key must
    /// never silently degrade to plaintext storage.
    pub fn new(key_base64: Option<&str>) -> Result<Self> {
        let key = match key_base64 {
            Some(k) => Some(validate_key(k)?),
            None => None,
        };
        Ok(Self { key })
    }

    /// Pass-through cipher for deployments without an encryption key.
    pub fn unkeyed() -> Self {
        Self { key: None }
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypts a token for storage. Empty input and unkeyed operation
    /// short-circuit to the input itself.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return plaintext.to_string();
        }

        let key = match &self.key {
            Some(k) => k,
            None => {
                MISSING_KEY_WARNING.call_once(|| {
                    warn!("token encryption key not set, tokens will be stored unencrypted");
                });
                return plaintext.to_string();
            }
        };

        // Key length was validated at construction
        let cipher = match Aes256Gcm::new_from_slice(key) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "token encryption failed, storing value unencrypted");
                return plaintext.to_string();
            }
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        match cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
                payload.extend_from_slice(&nonce);
                payload.extend_from_slice(&ciphertext);
                BASE64.encode(payload)
            }
            Err(e) => {
                warn!(error = %e, "token encryption failed, storing value unencrypted");
                plaintext.to_string()
            }
        }
    }

    /// Decrypts a stored token. Values that fail base64 decoding, are too
    /// short to contain a nonce, or fail GCM authentication are treated
    /// as legacy unencrypted data and returned unchanged.
    pub fn decrypt(&self, stored: &str) -> String {
        if stored.is_empty() {
            return stored.to_string();
        }

        let key = match &self.key {
            Some(k) => k,
            None => return stored.to_string(),
        };

        let payload = match BASE64.decode(stored) {
            Ok(p) => p,
            Err(_) => {
                warn!("token decryption failed - may be unencrypted legacy data");
                return stored.to_string();
            }
        };

        if payload.len() <= NONCE_SIZE {
            warn!("token decryption failed - may be unencrypted legacy data");
            return stored.to_string();
        }

        let cipher = match Aes256Gcm::new_from_slice(key) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "token decryption failed");
                return stored.to_string();
            }
        };

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        match cipher.decrypt(nonce, ciphertext) {
            Ok(plaintext) => match String::from_utf8(plaintext) {
                Ok(s) => s,
                Err(_) => {
                    warn!("decrypted token is not valid UTF-8, returning stored value");
                    stored.to_string()
                }
            },
            Err(_) => {
                warn!("token decryption failed - may be unencrypted legacy data");
                stored.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        BASE64.encode([7u8; 32])
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key(&BASE64.encode([0u8; 32])).is_ok());
        assert!(validate_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(validate_key(&BASE64.encode([0u8; 64])).is_err());
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = TokenCipher::new(Some(&test_key())).unwrap();
        let plaintext = "my-secret-access-token-12345";

        let stored = cipher.encrypt(plaintext);
        assert_ne!(stored, plaintext);
        assert_eq!(cipher.decrypt(&stored), plaintext);
    }

    #[test]
    fn test_unkeyed_passthrough() {
        let cipher = TokenCipher::unkeyed();
        assert_eq!(cipher.encrypt("token-value"), "token-value");
        assert_eq!(cipher.decrypt("token-value"), "token-value");
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let cipher = TokenCipher::new(Some(&test_key())).unwrap();
        assert_eq!(cipher.encrypt(""), "");
        assert_eq!(cipher.decrypt(""), "");
    }

    #[test]
    fn test_legacy_plaintext_decrypts_to_itself() {
        // Row written before encryption was configured: not valid base64
        let cipher = TokenCipher::new(Some(&test_key())).unwrap();
        assert_eq!(cipher.decrypt("sl.legacy-plaintext-token"), "sl.legacy-plaintext-token");
    }

    #[test]
    fn test_valid_base64_but_not_ciphertext_decrypts_to_itself() {
        // Legacy token that happens to be valid base64 fails GCM
        // authentication and is passed through
        let cipher = TokenCipher::new(Some(&test_key())).unwrap();
        let legacy = BASE64.encode("some-old-plaintext-token-material");
        assert_eq!(cipher.decrypt(&legacy), legacy);
    }

    #[test]
    fn test_wrong_key_degrades_to_stored_value() {
        let cipher1 = TokenCipher::new(Some(&test_key())).unwrap();
        let cipher2 = TokenCipher::new(Some(&BASE64.encode([9u8; 32]))).unwrap();

        let stored = cipher1.encrypt("secret");
        // Wrong key: authentication fails, stored value returned unchanged
        assert_eq!(cipher2.decrypt(&stored), stored);
    }

    #[test]
    fn test_unique_nonces() {
        let cipher = TokenCipher::new(Some(&test_key())).unwrap();
        let a = cipher.encrypt("same-plaintext");
        let b = cipher.encrypt("same-plaintext");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a), "same-plaintext");
        assert_eq!(cipher.decrypt(&b), "same-plaintext");
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        assert!(TokenCipher::new(Some("short")).is_err());
    }
}
