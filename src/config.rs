//! Environment-driven configuration.
//!
//! Per-provider OAuth client credentials are read from
//! `STRATUS_OAUTH_{PROVIDER}_CLIENT_ID` / `STRATUS_OAUTH_{PROVIDER}_CLIENT_SECRET`.
//! The token encryption key and callback base URL are process-wide and read
//! once at startup; the key is threaded explicitly into the token cipher
//! rather than re-read from ambient state on every call.

use crate::error::{Error, Result};

/// OAuth client credentials for one provider.
#[derive(Clone, Debug)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderCredentials {
    /// Loads client credentials for a provider from the environment.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if either variable is missing or
    /// empty. The operation is fatal, not retried.
    pub fn from_env(provider_name: &str) -> Result<Self> {
        let prefix = provider_name.to_uppercase();
        let client_id = std::env::var(format!("STRATUS_OAUTH_{}_CLIENT_ID", prefix))
            .unwrap_or_default();
        let client_secret = std::env::var(format!("STRATUS_OAUTH_{}_CLIENT_SECRET", prefix))
            .unwrap_or_default();

        if client_id.is_empty() || client_secret.is_empty() {
            return Err(Error::Configuration(format!(
                "{} OAuth credentials not configured. Set STRATUS_OAUTH_{}_CLIENT_ID \
                 and STRATUS_OAUTH_{}_CLIENT_SECRET environment variables.",
                provider_name, prefix, prefix
            )));
        }

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Process-wide settings shared by all providers.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base64-encoded 32-byte token encryption key. When absent, tokens
    /// are stored unencrypted and a warning is logged.
    pub encryption_key: Option<String>,
    /// Base URL used to build OAuth redirect URIs
    /// (e.g. "https://app.example.com").
    pub callback_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            encryption_key: std::env::var("STRATUS_TOKEN_ENCRYPTION_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            callback_base_url: std::env::var("STRATUS_CALLBACK_BASE_URL")
                .unwrap_or_else(|_| default_callback_base_url()),
        }
    }
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}
