//! Token lifecycle engine for one (principal, provider) pair.
//!
//! A [`Connection`] binds a principal, a provider adapter, client
//! credentials, and the credential store, and owns every token decision:
//! expiry checks with a refresh buffer, refresh-and-persist, saving
//! exchanged tokens, status reporting, and disconnect with best-effort
//! revocation. Callers above this layer never see raw token handling.
//!
//! Two connections for the same pair may refresh concurrently; the store
//! write is atomic and the last refresh wins. Both resulting tokens are
//! valid, so no cross-process lock is held.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::config::ProviderCredentials;
use crate::error::{Error, Result};
use crate::oauth::{self, TokenResponse};
use crate::provider::{
    AccountFields, CloudProvider, FolderListing, PageRequest, RevokeRequest,
};
use crate::store::{CredentialRecord, CredentialStore, CredentialWrite};

/// Tokens expiring within this window are refreshed before use, so a
/// token never expires mid-request.
pub const REFRESH_BUFFER_MINUTES: i64 = 5;

/// Identity on whose behalf tokens are held. Opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Connection state reported to callers. A disconnected pair reports
/// `connected: false` with every detail field `None`, never an error.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub provider: String,
    pub email: Option<String>,
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    fn disconnected(provider: &str) -> Self {
        Self {
            connected: false,
            provider: provider.to_string(),
            email: None,
            account_id: None,
            display_name: None,
            connected_at: None,
            expires_at: None,
        }
    }

    fn from_record(record: &CredentialRecord) -> Self {
        Self {
            connected: true,
            provider: record.provider.clone(),
            email: non_empty(&record.email),
            account_id: non_empty(&record.account_id),
            display_name: non_empty(&record.display_name),
            connected_at: Some(record.connected_at),
            expires_at: record.expires_at,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Token lifecycle engine for one principal on one provider.
pub struct Connection {
    store: Arc<CredentialStore>,
    provider: Arc<dyn CloudProvider>,
    credentials: ProviderCredentials,
    principal: Principal,
    http: reqwest::Client,
}

impl Connection {
    pub fn new(
        store: Arc<CredentialStore>,
        provider: Arc<dyn CloudProvider>,
        credentials: ProviderCredentials,
        principal: Principal,
    ) -> Self {
        Self {
            store,
            provider,
            credentials,
            principal,
            http: reqwest::Client::new(),
        }
    }

    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Authenticated request executor bound to this connection.
    pub fn api(&self) -> ApiClient<'_> {
        ApiClient::new(self)
    }

    pub fn is_connected(&self) -> Result<bool> {
        Ok(self.record()?.is_some())
    }

    /// Current connection state. Never fails for "not connected".
    pub fn status(&self) -> Result<ConnectionStatus> {
        match self.record()? {
            Some(record) => Ok(ConnectionStatus::from_record(&record)),
            None => Ok(ConnectionStatus::disconnected(self.provider.name())),
        }
    }

    /// Builds the provider authorization URL for this connection's
    /// credentials.
    pub fn authorization_url(&self, redirect_uri: &str, state: Option<&str>) -> String {
        self.provider
            .build_authorization_url(&self.credentials, redirect_uri, state)
    }

    /// Returns an access token guaranteed valid for at least the refresh
    /// buffer, refreshing and persisting first when needed.
    ///
    /// # Errors
    /// [`Error::NotConnected`] when no active record exists, or when the
    /// token is expired and there is no refresh token to recover with.
    /// [`Error::TokenRefresh`] when the provider rejects the refresh.
    pub async fn ensure_valid(&self) -> Result<String> {
        let record = self.record()?.ok_or_else(|| self.not_connected())?;

        if !record.needs_refresh(Duration::minutes(REFRESH_BUFFER_MINUTES)) {
            return Ok(record.access_token);
        }

        if record.has_refresh_token() {
            let refreshed = self.refresh_record(&record).await?;
            return Ok(refreshed.access_token);
        }

        if record.is_token_expired() {
            return Err(Error::NotConnected(format!(
                "{} token for {} has expired and no refresh token is stored; reauthorization required",
                self.provider.display_name(),
                self.principal
            )));
        }

        // Inside the buffer but not yet expired, and nothing to refresh
        // with: the current token is still usable.
        Ok(record.access_token)
    }

    /// Refreshes this connection's access token unconditionally and
    /// persists the result. Used by the batch sweep; request-path callers
    /// go through [`ensure_valid`](Self::ensure_valid) instead.
    pub async fn refresh_access_token(&self) -> Result<CredentialRecord> {
        let record = self.record()?.ok_or_else(|| self.not_connected())?;
        if !record.has_refresh_token() {
            return Err(Error::TokenRefresh(format!(
                "no refresh token stored for {} on {}",
                self.principal,
                self.provider.name()
            )));
        }
        self.refresh_record(&record).await
    }

    async fn refresh_record(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::TokenRefresh("no refresh token stored".to_string()))?;

        let response = oauth::refresh_access_token(
            &self.http,
            self.provider.as_ref(),
            &self.credentials,
            refresh_token,
        )
        .await?;

        let updated = self.save_tokens(&response, None)?;
        info!(
            provider = self.provider.name(),
            principal = %self.principal,
            "access token refreshed"
        );
        Ok(updated)
    }

    /// Persists a token response for this connection. `expires_at` is
    /// computed here, at write time, from `expires_in` (falling back to
    /// the provider default). A response without a rotated refresh token
    /// leaves the stored one in place.
    pub fn save_tokens(
        &self,
        response: &TokenResponse,
        account: Option<AccountFields>,
    ) -> Result<CredentialRecord> {
        let write = CredentialWrite {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "bearer".to_string()),
            expires_at: Some(response.expires_at(self.provider.default_token_expiry_secs())),
            scopes: response.scope.clone().map(|s| s.into_vec()),
            account,
        };

        let (record, created) =
            self.store
                .upsert(self.principal.as_str(), self.provider.name(), &write)?;
        if created {
            info!(
                provider = self.provider.name(),
                principal = %self.principal,
                "connection established"
            );
        }
        Ok(record)
    }

    /// Disconnects this pair: best-effort token revocation at the
    /// provider, then soft-delete of the stored record.
    ///
    /// Revocation failure never blocks disconnect; the record is
    /// deactivated regardless. Returns false if there was nothing to
    /// disconnect (already a success).
    pub async fn disconnect(&self) -> Result<bool> {
        let record = match self.record()? {
            Some(r) => r,
            None => return Ok(false),
        };

        if let Some(revoke) = self
            .provider
            .revoke_request(&self.credentials, &record.access_token)
        {
            if let Err(e) = self.send_revoke(revoke, &record.access_token).await {
                warn!(
                    provider = self.provider.name(),
                    principal = %self.principal,
                    error = %e,
                    "token revocation failed, disconnecting anyway"
                );
            }
        }

        let deactivated = self
            .store
            .deactivate(self.principal.as_str(), self.provider.name())?;
        info!(
            provider = self.provider.name(),
            principal = %self.principal,
            "disconnected"
        );
        Ok(deactivated)
    }

    async fn send_revoke(&self, revoke: RevokeRequest, access_token: &str) -> Result<()> {
        let response = match revoke {
            RevokeRequest::Api(request) => {
                let url = ApiClient::resolve_url(self.provider.as_ref(), &request.path);
                let mut builder = self
                    .http
                    .request(request.method, url)
                    .bearer_auth(access_token)
                    .query(&request.query);
                if let Some(body) = request.json_body {
                    builder = builder.json(&body);
                }
                builder.send().await
            }
            RevokeRequest::Form { url, params } => self.http.post(url).form(&params).send().await,
        }
        .map_err(|e| Error::Api {
            status_code: None,
            message: format!("revocation request failed: {}", e),
        })?;

        if !response.status().is_success() {
            return Err(Error::Api {
                status_code: Some(response.status().as_u16()),
                message: format!("revocation returned {}", response.status().as_u16()),
            });
        }
        Ok(())
    }

    /// Raw account-info payload from the provider, via the executor.
    pub async fn fetch_account_info(&self) -> Result<serde_json::Value> {
        self.provider.fetch_account_info(&self.api()).await
    }

    /// Folder contents in the uniform shape, via the executor.
    pub async fn list_folder(
        &self,
        folder_id: Option<&str>,
        page: &PageRequest,
    ) -> Result<FolderListing> {
        self.provider.list_folder(&self.api(), folder_id, page).await
    }

    fn record(&self) -> Result<Option<CredentialRecord>> {
        self.store
            .load(self.principal.as_str(), self.provider.name())
    }

    fn not_connected(&self) -> Error {
        Error::NotConnected(format!(
            "no active {} connection for {}",
            self.provider.display_name(),
            self.principal
        ))
    }
}
