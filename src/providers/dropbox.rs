//! Dropbox adapter.
//!
//! Dropbox is RPC-style: listing and account info are POSTs with JSON
//! arguments, continuation uses a cursor endpoint, and errors carry an
//! `error_summary` string. Offline access is requested with
//! `token_access_type=offline` instead of a scope.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ProviderCredentials;
use crate::provider::{
    AccountFields, ApiRequest, CloudProvider, EntryKind, FolderEntry, FolderListing,
    PageRequest, RevokeRequest,
};

/// Dropbox access tokens default to a four hour lifetime.
const DEFAULT_TOKEN_EXPIRY_SECS: i64 = 14400;

pub struct Dropbox;

#[async_trait]
impl CloudProvider for Dropbox {
    fn name(&self) -> &'static str {
        "dropbox"
    }

    fn display_name(&self) -> &'static str {
        "Dropbox"
    }

    fn api_base_url(&self) -> &'static str {
        "https://api.dropboxapi.com/2"
    }

    fn auth_url(&self) -> &'static str {
        "https://www.dropbox.com/oauth2/authorize"
    }

    fn token_url(&self) -> &'static str {
        "https://api.dropboxapi.com/oauth2/token"
    }

    fn default_token_expiry_secs(&self) -> i64 {
        DEFAULT_TOKEN_EXPIRY_SECS
    }

    fn default_scopes(&self) -> &'static [&'static str] {
        // Scopes come from the app registration, not the request
        &[]
    }

    fn extra_auth_params(&self) -> Vec<(&'static str, &'static str)> {
        vec![("token_access_type", "offline")]
    }

    fn account_info_request(&self) -> ApiRequest {
        ApiRequest::post("users/get_current_account")
    }

    fn list_folder_request(&self, folder_id: Option<&str>, page: &PageRequest) -> ApiRequest {
        if let Some(cursor) = &page.page_token {
            return ApiRequest::post("files/list_folder/continue")
                .with_json(json!({ "cursor": cursor }));
        }
        ApiRequest::post("files/list_folder").with_json(json!({
            "path": folder_id.unwrap_or(""),
            "recursive": false,
            "include_media_info": false,
            "include_deleted": false,
        }))
    }

    fn extract_account_fields(&self, info: &Value) -> AccountFields {
        AccountFields {
            account_id: str_field(info, "account_id"),
            email: str_field(info, "email"),
            display_name: info
                .get("name")
                .and_then(|n| n.get("display_name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn parse_listing(&self, raw: &Value, requested_folder: Option<&str>) -> FolderListing {
        let entries = raw
            .get("entries")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_entry).collect())
            .unwrap_or_default();

        FolderListing {
            path: match requested_folder {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => "/".to_string(),
            },
            entries,
            has_more: raw
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            cursor: raw
                .get("cursor")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn extract_error_detail(&self, status: u16, body: &str) -> String {
        if let Ok(json) = serde_json::from_str::<Value>(body) {
            if let Some(summary) = json.get("error_summary").and_then(Value::as_str) {
                return summary.to_string();
            }
        }
        if body.trim().is_empty() {
            status.to_string()
        } else {
            body.to_string()
        }
    }

    fn revoke_request(
        &self,
        _credentials: &ProviderCredentials,
        _access_token: &str,
    ) -> Option<RevokeRequest> {
        Some(RevokeRequest::Api(ApiRequest::post("auth/token/revoke")))
    }
}

fn parse_entry(item: &Value) -> FolderEntry {
    let kind = if item.get(".tag").and_then(Value::as_str) == Some("folder") {
        EntryKind::Folder
    } else {
        EntryKind::File
    };

    FolderEntry {
        name: str_field(item, "name"),
        path: str_field(item, "path_display"),
        kind,
        size: item.get("size").and_then(Value::as_u64),
        modified: item
            .get("client_modified")
            .or_else(|| item.get("server_modified"))
            .and_then(Value::as_str)
            .map(str::to_string),
        id: item.get("id").and_then(Value::as_str).map(str::to_string),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
