//! Google Drive adapter.
//!
//! Listing is a query against the `files` collection scoped to a parent
//! folder; account info lives on a separate userinfo host, reached with
//! an absolute URL through the same executor. Drive reports file sizes
//! as strings.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ProviderCredentials;
use crate::provider::{
    AccountFields, ApiRequest, CloudProvider, EntryKind, FolderEntry, FolderListing,
    PageRequest, RevokeRequest,
};

const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,modifiedTime)";

const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

pub struct GoogleDrive;

#[async_trait]
impl CloudProvider for GoogleDrive {
    fn name(&self) -> &'static str {
        "google_drive"
    }

    fn display_name(&self) -> &'static str {
        "Google Drive"
    }

    fn api_base_url(&self) -> &'static str {
        "https://www.googleapis.com/drive/v3"
    }

    fn auth_url(&self) -> &'static str {
        "https://accounts.google.com/o/oauth2/auth"
    }

    fn token_url(&self) -> &'static str {
        "https://oauth2.googleapis.com/token"
    }

    fn default_scopes(&self) -> &'static [&'static str] {
        &[
            "https://www.googleapis.com/auth/drive.readonly",
            "https://www.googleapis.com/auth/drive.file",
            "https://www.googleapis.com/auth/userinfo.email",
            "https://www.googleapis.com/auth/userinfo.profile",
        ]
    }

    fn extra_auth_params(&self) -> Vec<(&'static str, &'static str)> {
        // consent prompt forces a refresh token on re-authorization
        vec![("access_type", "offline"), ("prompt", "consent")]
    }

    fn account_info_request(&self) -> ApiRequest {
        ApiRequest::get(USERINFO_URL)
    }

    fn list_folder_request(&self, folder_id: Option<&str>, page: &PageRequest) -> ApiRequest {
        let parent = folder_id.unwrap_or("root");
        let page_size = page.page_size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);

        let mut request = ApiRequest::get("files")
            .with_query("pageSize", page_size.to_string())
            .with_query("fields", LIST_FIELDS)
            .with_query("q", format!("'{}' in parents and trashed=false", parent));
        if let Some(token) = &page.page_token {
            request = request.with_query("pageToken", token.clone());
        }
        request
    }

    fn extract_account_fields(&self, info: &Value) -> AccountFields {
        AccountFields {
            account_id: str_field(info, "id"),
            email: str_field(info, "email"),
            display_name: str_field(info, "name"),
        }
    }

    fn parse_listing(&self, raw: &Value, requested_folder: Option<&str>) -> FolderListing {
        let entries = raw
            .get("files")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_entry).collect())
            .unwrap_or_default();

        let cursor = raw
            .get("nextPageToken")
            .and_then(Value::as_str)
            .map(str::to_string);

        FolderListing {
            path: requested_folder.unwrap_or("root").to_string(),
            entries,
            has_more: cursor.is_some(),
            cursor,
        }
    }

    fn revoke_request(
        &self,
        _credentials: &ProviderCredentials,
        access_token: &str,
    ) -> Option<RevokeRequest> {
        Some(RevokeRequest::Form {
            url: REVOKE_URL.to_string(),
            params: vec![("token".to_string(), access_token.to_string())],
        })
    }
}

fn parse_entry(item: &Value) -> FolderEntry {
    let kind = if item.get("mimeType").and_then(Value::as_str) == Some(FOLDER_MIME_TYPE) {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    let name = str_field(item, "name");

    FolderEntry {
        path: name.clone(),
        name,
        kind,
        // Drive returns size as a decimal string
        size: item.get("size").and_then(|s| match s {
            Value::String(s) => s.parse().ok(),
            other => other.as_u64(),
        }),
        modified: item
            .get("modifiedTime")
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
