//! Provider contract for cloud storage backends.
//!
//! Each provider adapter supplies OAuth endpoints, default scopes, and
//! pure mappings from its raw API shapes into the uniform account and
//! listing types. Everything with behavior (code exchange, refresh,
//! authenticated calls, retry) lives in the generic engine and is shared
//! by all providers, so an adapter is constants plus mappings.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::api_client::ApiClient;
use crate::config::ProviderCredentials;
use crate::error::Result;

/// Identity fields reported by a provider, best-effort.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountFields {
    pub account_id: String,
    pub email: String,
    pub display_name: String,
}

/// Paging inputs for a folder listing.
#[derive(Clone, Debug, Default)]
pub struct PageRequest {
    pub page_size: Option<u32>,
    /// Provider-issued continuation token from a previous page.
    pub page_token: Option<String>,
}

/// File or folder entry in the uniform listing shape.
#[derive(Clone, Debug, Serialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// Uniform folder listing returned by every provider.
#[derive(Clone, Debug, Serialize)]
pub struct FolderListing {
    pub path: String,
    pub entries: Vec<FolderEntry>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Descriptor for an authenticated provider API call, executed by the
/// request executor. `path` is relative to the provider's API base URL
/// unless it is an absolute URL.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: reqwest::Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub json_body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            query: Vec::new(),
            json_body: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::POST,
            path: path.into(),
            query: Vec::new(),
            json_body: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.json_body = Some(body);
        self
    }
}

/// How a provider's tokens are revoked on disconnect.
#[derive(Clone, Debug)]
pub enum RevokeRequest {
    /// Routed through the authenticated request executor.
    Api(ApiRequest),
    /// Bare form POST to an absolute URL (no bearer header).
    Form {
        url: String,
        params: Vec<(String, String)>,
    },
}

/// Capability set every cloud storage provider implements.
///
/// The two async methods have default implementations that route through
/// the executor, which is the generic path. Adapters normally implement only the
/// constants and the pure mappings.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Stable lowercase identifier ("google_drive"). Used as the storage
    /// namespace and the environment-variable prefix.
    fn name(&self) -> &'static str;

    /// Human-readable name for log and error messages ("Google Drive").
    fn display_name(&self) -> &'static str;

    fn api_base_url(&self) -> &'static str;
    fn auth_url(&self) -> &'static str;
    fn token_url(&self) -> &'static str;

    /// Fallback token lifetime when the provider omits `expires_in`.
    fn default_token_expiry_secs(&self) -> i64 {
        3600
    }

    /// Scopes requested at authorization. Empty means the provider does
    /// not take a scope parameter.
    fn default_scopes(&self) -> &'static [&'static str];

    /// Provider-specific authorization parameters beyond the standard
    /// set (offline access, consent prompts).
    fn extra_auth_params(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    /// Builds the user-facing authorization URL. Deterministic for
    /// identical inputs.
    fn build_authorization_url(
        &self,
        credentials: &ProviderCredentials,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> String {
        let mut params: Vec<(String, String)> = vec![
            ("client_id".to_string(), credentials.client_id.clone()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
            ("response_type".to_string(), "code".to_string()),
        ];
        let scopes = self.default_scopes();
        if !scopes.is_empty() {
            params.push(("scope".to_string(), scopes.join(" ")));
        }
        for (k, v) in self.extra_auth_params() {
            params.push((k.to_string(), v.to_string()));
        }
        if let Some(state) = state {
            params.push(("state".to_string(), state.to_string()));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.auth_url(), query)
    }

    /// Descriptor for the account-info call.
    fn account_info_request(&self) -> ApiRequest;

    /// Descriptor for a folder listing call. `folder_id` of `None` means
    /// the root folder.
    fn list_folder_request(&self, folder_id: Option<&str>, page: &PageRequest) -> ApiRequest;

    /// Pure mapping from the provider's raw account-info payload into the
    /// uniform identity fields. Missing fields map to empty strings.
    fn extract_account_fields(&self, info: &Value) -> AccountFields;

    /// Pure mapping from the provider's raw listing payload into the
    /// uniform listing shape.
    fn parse_listing(&self, raw: &Value, requested_folder: Option<&str>) -> FolderListing;

    /// Pulls a human-readable message out of a provider error body.
    /// The default handles the common `{"error": {"message": ...}}` shape
    /// and falls back to the body text or the status code.
    fn extract_error_detail(&self, status: u16, body: &str) -> String {
        if let Ok(json) = serde_json::from_str::<Value>(body) {
            if let Some(message) = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
            {
                return message.to_string();
            }
            if let Some(message) = json.get("error").and_then(|e| e.as_str()) {
                return message.to_string();
            }
        }
        if body.trim().is_empty() {
            status.to_string()
        } else {
            body.to_string()
        }
    }

    /// Descriptor for token revocation, or `None` when the provider has
    /// no revoke endpoint. `access_token` is the decrypted token being
    /// revoked; some providers also require the client credentials in
    /// the revoke body.
    fn revoke_request(
        &self,
        _credentials: &ProviderCredentials,
        _access_token: &str,
    ) -> Option<RevokeRequest> {
        None
    }

    /// Fetches the raw account-info payload through the executor.
    async fn fetch_account_info(&self, api: &ApiClient<'_>) -> Result<Value> {
        api.execute(self.account_info_request()).await
    }

    /// Lists folder contents through the executor, mapped into the
    /// uniform shape.
    async fn list_folder(
        &self,
        api: &ApiClient<'_>,
        folder_id: Option<&str>,
        page: &PageRequest,
    ) -> Result<FolderListing> {
        let raw = api.execute(self.list_folder_request(folder_id, page)).await?;
        Ok(self.parse_listing(&raw, folder_id))
    }
}
