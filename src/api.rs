//! Exposed operations for one provider.
//!
//! [`ProviderEndpoint`] bundles everything a host needs to serve the
//! connection surface for a single provider: status, authorize,
//! callback, contents, and disconnect. The shapes returned here are
//! serializable and framework-free; the host maps them onto its own
//! transport.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ProviderCredentials;
use crate::connection::{Connection, ConnectionStatus, Principal};
use crate::error::{Error, Result};
use crate::oauth;
use crate::provider::{CloudProvider, FolderEntry, PageRequest};
use crate::state::StateManager;
use crate::store::CredentialStore;

/// Response to an authorize request.
#[derive(Clone, Debug, Serialize)]
pub struct AuthorizeResponse {
    pub authorization_url: String,
    pub message: String,
}

/// Response to a disconnect request.
#[derive(Clone, Debug, Serialize)]
pub struct DisconnectResponse {
    pub message: String,
}

/// Response to a folder contents request.
#[derive(Clone, Debug, Serialize)]
pub struct ContentsResponse {
    pub path: String,
    pub entries: Vec<FolderEntry>,
    pub total_count: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Query parameters delivered to the OAuth callback.
#[derive(Clone, Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Outcome of the OAuth callback. Never an error: the host renders one
/// of these two shapes to the returning user regardless of what went
/// wrong.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Success { provider: String, email: Option<String> },
    Failure { error: String },
}

/// Operation surface for one provider, shared across principals.
pub struct ProviderEndpoint {
    store: Arc<CredentialStore>,
    provider: Arc<dyn CloudProvider>,
    credentials: ProviderCredentials,
    states: StateManager,
    callback_base_url: String,
}

impl ProviderEndpoint {
    pub fn new(
        store: Arc<CredentialStore>,
        provider: Arc<dyn CloudProvider>,
        credentials: ProviderCredentials,
        states: StateManager,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            credentials,
            states,
            callback_base_url: callback_base_url.into(),
        }
    }

    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    /// The lifecycle engine for one principal on this provider.
    pub fn connection(&self, principal: Principal) -> Connection {
        Connection::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            self.credentials.clone(),
            principal,
        )
    }

    fn redirect_uri(&self) -> String {
        format!(
            "{}/api/{}/callback",
            self.callback_base_url.trim_end_matches('/'),
            self.provider.name()
        )
    }

    /// Connection state for a principal. Reports disconnected rather
    /// than failing when no record exists.
    pub fn status(&self, principal: Principal) -> Result<ConnectionStatus> {
        self.connection(principal).status()
    }

    /// Starts the authorization flow: issues a CSRF state binding this
    /// provider, the principal, and the redirect URI, and returns the
    /// URL to send the user to.
    pub fn authorize(&self, principal: Principal) -> Result<AuthorizeResponse> {
        let redirect_uri = self.redirect_uri();
        let state = self
            .states
            .issue(self.provider.name(), &principal, &redirect_uri);
        let url = self
            .connection(principal)
            .authorization_url(&redirect_uri, Some(&state));

        Ok(AuthorizeResponse {
            authorization_url: url,
            message: format!(
                "Visit the URL to connect your {} account",
                self.provider.display_name()
            ),
        })
    }

    /// Completes the authorization flow from callback query parameters.
    ///
    /// Infallible by contract: a denial from the provider, a missing or
    /// stale state, or a failed exchange all become a
    /// [`CallbackOutcome::Failure`] for the host to render.
    pub async fn callback(&self, params: CallbackParams) -> CallbackOutcome {
        if let Some(error) = params.error {
            let detail = params.error_description.unwrap_or(error);
            warn!(provider = self.provider.name(), error = %detail, "authorization denied");
            return CallbackOutcome::Failure {
                error: format!("Authorization failed: {}", detail),
            };
        }

        let (code, state) = match (params.code, params.state) {
            (Some(code), Some(state)) => (code, state),
            _ => {
                return CallbackOutcome::Failure {
                    error: "Missing authorization code or state".to_string(),
                }
            }
        };

        let pending = match self.states.redeem(&state) {
            Some(p) if p.provider == self.provider.name() => p,
            _ => {
                warn!(provider = self.provider.name(), "callback with invalid or expired state");
                return CallbackOutcome::Failure {
                    error: "Invalid or expired authorization state".to_string(),
                };
            }
        };

        let conn = self.connection(pending.principal);
        // The exchange must present the redirect URI the flow started
        // with, so it comes from the redeemed state
        let response = match oauth::exchange_code(
            conn.http(),
            self.provider.as_ref(),
            &self.credentials,
            &code,
            &pending.redirect_uri,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "code exchange failed");
                return CallbackOutcome::Failure {
                    error: format!("Token exchange failed: {}", e),
                };
            }
        };

        // Persist tokens before touching the provider API, so a failed
        // account-info call cannot lose the connection
        if let Err(e) = conn.save_tokens(&response, None) {
            warn!(provider = self.provider.name(), error = %e, "failed to store tokens");
            return CallbackOutcome::Failure {
                error: "Failed to store connection".to_string(),
            };
        }

        let email = match conn.fetch_account_info().await {
            Ok(info) => {
                let account = self.provider.extract_account_fields(&info);
                let email = non_empty(&account.email);
                if let Err(e) = conn.save_tokens(&response, Some(account)) {
                    warn!(provider = self.provider.name(), error = %e, "failed to store account identity");
                }
                email
            }
            Err(e) => {
                // Identity is best-effort; the connection stands without it
                warn!(provider = self.provider.name(), error = %e, "account info fetch failed");
                None
            }
        };

        info!(provider = self.provider.name(), "connection authorized");
        CallbackOutcome::Success {
            provider: self.provider.name().to_string(),
            email,
        }
    }

    /// Folder contents for a principal in the uniform shape.
    pub async fn contents(
        &self,
        principal: Principal,
        folder_id: Option<&str>,
        page: &PageRequest,
    ) -> Result<ContentsResponse> {
        let listing = self
            .connection(principal)
            .list_folder(folder_id, page)
            .await?;

        Ok(ContentsResponse {
            path: listing.path,
            total_count: listing.entries.len(),
            has_more: listing.has_more,
            cursor: listing.cursor,
            entries: listing.entries,
        })
    }

    /// Disconnects a principal from this provider.
    ///
    /// # Errors
    /// [`Error::NotConnected`] when there is nothing to disconnect; the
    /// host typically maps this onto a 4xx response.
    pub async fn disconnect(&self, principal: Principal) -> Result<DisconnectResponse> {
        let conn = self.connection(principal);
        if !conn.disconnect().await? {
            return Err(Error::NotConnected(format!(
                "No active {} connection to disconnect",
                self.provider.display_name()
            )));
        }

        Ok(DisconnectResponse {
            message: format!("{} disconnected", self.provider.display_name()),
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
