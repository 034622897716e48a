// Error taxonomy shared across the crate
pub mod error;

// Environment-driven configuration
pub mod config;

// AES-256-GCM token encryption
pub mod cipher;

// Encrypted credential storage
pub mod store;

// Provider contract and uniform shapes
pub mod provider;

// OAuth token endpoint client
pub mod oauth;

// Token lifecycle engine
pub mod connection;

// Authenticated request executor and retry
pub mod api_client;

// Batch token refresh sweep
pub mod sweep;

// CSRF state management
pub mod state;

// Exposed per-provider operations
pub mod api;

// Built-in provider adapters
pub mod providers;

pub use api::{CallbackOutcome, CallbackParams, ProviderEndpoint};
pub use api_client::{retry_with_backoff, ApiClient, RetryPolicy};
pub use cipher::TokenCipher;
pub use config::{Config, ProviderCredentials};
pub use connection::{Connection, ConnectionStatus, Principal};
pub use error::{Error, Result};
pub use provider::{CloudProvider, FolderEntry, FolderListing, PageRequest};
pub use state::{PendingAuth, StateManager};
pub use store::{CredentialRecord, CredentialStore};
pub use sweep::{refresh_expiring_tokens, SweepSummary};
