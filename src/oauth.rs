//! OAuth token endpoint client.
//!
//! The single generic path for authorization-code exchange and refresh,
//! shared by all providers: each is a form POST to the provider's token
//! URL with a bounded timeout. A rejected grant surfaces as a typed
//! refresh failure the caller decides how to treat; only network-level
//! failures are transient.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::api_client::{retry_with_backoff, RetryPolicy};
use crate::config::ProviderCredentials;
use crate::error::{Error, Result};
use crate::provider::CloudProvider;

/// Timeout for token endpoint calls. A hung provider must never stall
/// the sweep or the request path indefinitely.
pub const TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Standard OAuth 2.0 token response.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<ScopeField>,
}

/// Granted scopes arrive as a space-delimited string from most providers
/// and as a JSON list from some.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ScopeField {
    Spaced(String),
    List(Vec<String>),
}

impl ScopeField {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ScopeField::Spaced(s) => s.split_whitespace().map(str::to_string).collect(),
            ScopeField::List(v) => v,
        }
    }
}

impl TokenResponse {
    /// Expiry timestamp for tokens written now: `now + expires_in`, with
    /// the provider default when the response omits `expires_in`.
    pub fn expires_at(&self, default_expiry_secs: i64) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.expires_in.unwrap_or(default_expiry_secs))
    }
}

/// Exchanges an authorization code for tokens. Transient network
/// failures are retried with backoff; a provider rejection is terminal.
pub async fn exchange_code(
    client: &reqwest::Client,
    provider: &dyn CloudProvider,
    credentials: &ProviderCredentials,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", redirect_uri);
    form.insert("client_id", credentials.client_id.as_str());
    form.insert("client_secret", credentials.client_secret.as_str());

    debug!(provider = provider.name(), "exchanging authorization code for tokens");

    retry_with_backoff(
        || post_token_form(client, provider, &form),
        RetryPolicy::default(),
        Error::is_transient,
    )
    .await
}

/// Refreshes an access token using the stored refresh token. Returns a
/// typed failure rather than panicking when the provider rejects the
/// grant (e.g. revoked consent); the caller decides whether that is
/// terminal.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    provider: &dyn CloudProvider,
    credentials: &ProviderCredentials,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let mut form = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", refresh_token);
    form.insert("client_id", credentials.client_id.as_str());
    form.insert("client_secret", credentials.client_secret.as_str());

    debug!(provider = provider.name(), "refreshing access token");

    post_token_form(client, provider, &form).await
}

async fn post_token_form(
    client: &reqwest::Client,
    provider: &dyn CloudProvider,
    form: &HashMap<&str, &str>,
) -> Result<TokenResponse> {
    let response = client
        .post(provider.token_url())
        .header("Accept", "application/json")
        .timeout(TOKEN_TIMEOUT)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::Api {
            status_code: None,
            message: format!("token endpoint request failed: {}", sanitize_reqwest_error(&e)),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = provider.extract_error_detail(status.as_u16(), &body);
        return Err(Error::TokenRefresh(format!(
            "{} token endpoint returned {}: {}",
            provider.display_name(),
            status.as_u16(),
            detail
        )));
    }

    response.json::<TokenResponse>().await.map_err(|e| {
        Error::TokenRefresh(format!(
            "failed to parse {} token response: {}",
            provider.display_name(),
            e
        ))
    })
}

/// reqwest errors can embed the full request URL; token endpoint URLs
/// never carry secrets, but keep messages to the error kind anyway.
fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        "connection error".to_string()
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AccountFields, ApiRequest, FolderListing, PageRequest};
    use async_trait::async_trait;
    use serde_json::Value;

    struct TokenProvider {
        token_url: &'static str,
    }

    impl TokenProvider {
        fn at(token_url: String) -> Self {
            Self {
                token_url: Box::leak(token_url.into_boxed_str()),
            }
        }
    }

    #[async_trait]
    impl CloudProvider for TokenProvider {
        fn name(&self) -> &'static str {
            "tokenprov"
        }
        fn display_name(&self) -> &'static str {
            "TokenProv"
        }
        fn api_base_url(&self) -> &'static str {
            "https://api.example.com"
        }
        fn auth_url(&self) -> &'static str {
            "https://example.com/authorize"
        }
        fn token_url(&self) -> &'static str {
            self.token_url
        }
        fn default_scopes(&self) -> &'static [&'static str] {
            &[]
        }
        fn account_info_request(&self) -> ApiRequest {
            ApiRequest::get("me")
        }
        fn list_folder_request(&self, _: Option<&str>, _: &PageRequest) -> ApiRequest {
            ApiRequest::get("files")
        }
        fn extract_account_fields(&self, _: &Value) -> AccountFields {
            AccountFields::default()
        }
        fn parse_listing(&self, _: &Value, _: Option<&str>) -> FolderListing {
            FolderListing {
                path: "/".to_string(),
                entries: vec![],
                has_more: false,
                cursor: None,
            }
        }
    }

    fn test_credentials() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
        }
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "tok_123",
            "refresh_token": "ref_456",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "files.read files.write"
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "tok_123");
        assert_eq!(response.refresh_token.as_deref(), Some("ref_456"));
        assert_eq!(response.expires_in, Some(3600));
        assert_eq!(
            response.scope.unwrap().into_vec(),
            vec!["files.read", "files.write"]
        );
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "only"}"#).unwrap();
        assert_eq!(response.access_token, "only");
        assert!(response.refresh_token.is_none());
        assert!(response.expires_in.is_none());
        assert!(response.scope.is_none());
    }

    #[test]
    fn test_scope_as_list() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t", "scope": ["a", "b"]}"#).unwrap();
        assert_eq!(response.scope.unwrap().into_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_expires_at_uses_default_when_absent() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t"}"#).unwrap();
        let expires_at = response.expires_at(14400);
        let delta = expires_at - Utc::now();
        assert!(delta > Duration::seconds(14390) && delta <= Duration::seconds(14400));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A","refresh_token":"R","expires_in":3600}"#)
            .create_async()
            .await;

        let provider = TokenProvider::at(format!("{}/token", server.url()));
        let client = reqwest::Client::new();
        let before = Utc::now();

        let response = exchange_code(&client, &provider, &test_credentials(), "the-code", "http://cb")
            .await
            .unwrap();

        assert_eq!(response.access_token, "A");
        assert_eq!(response.refresh_token.as_deref(), Some("R"));

        // expires_at is anchored at write time, not provider time
        let expires_at = response.expires_at(provider.default_token_expiry_secs());
        assert!(expires_at >= before + Duration::seconds(3599));
        assert!(expires_at <= Utc::now() + Duration::seconds(3600));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code_rejection_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = TokenProvider::at(format!("{}/token", server.url()));
        let client = reqwest::Client::new();

        let err = exchange_code(&client, &provider, &test_credentials(), "bad", "http://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenRefresh(_)));
        assert!(err.to_string().contains("invalid_grant"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_typed_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error": {"message": "grant revoked"}}"#)
            .create_async()
            .await;

        let provider = TokenProvider::at(format!("{}/token", server.url()));
        let client = reqwest::Client::new();

        let err = refresh_access_token(&client, &provider, &test_credentials(), "old-refresh")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenRefresh(_)));
        assert!(err.to_string().contains("grant revoked"));
        // The stored refresh token value must not appear in the error
        assert!(!err.to_string().contains("old-refresh"));
    }
}
