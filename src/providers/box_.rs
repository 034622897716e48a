//! Box adapter.
//!
//! Listings are offset-paged: the continuation token is the next offset
//! rendered as a decimal string, and `total_count` in the response tells
//! us whether more pages remain. Revocation is a form POST that must
//! carry the client credentials alongside the token.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ProviderCredentials;
use crate::provider::{
    AccountFields, ApiRequest, CloudProvider, EntryKind, FolderEntry, FolderListing,
    PageRequest, RevokeRequest,
};

const REVOKE_URL: &str = "https://api.box.com/oauth2/revoke";

const LIST_FIELDS: &str = "id,name,type,size,modified_at,path_collection";

const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

/// Box names the root folder "0".
const ROOT_FOLDER_ID: &str = "0";

pub struct BoxStorage;

#[async_trait]
impl CloudProvider for BoxStorage {
    fn name(&self) -> &'static str {
        "box"
    }

    fn display_name(&self) -> &'static str {
        "Box"
    }

    fn api_base_url(&self) -> &'static str {
        "https://api.box.com/2.0"
    }

    fn auth_url(&self) -> &'static str {
        "https://account.box.com/api/oauth2/authorize"
    }

    fn token_url(&self) -> &'static str {
        "https://api.box.com/oauth2/token"
    }

    fn default_scopes(&self) -> &'static [&'static str] {
        // Scopes come from the app registration, not the request
        &[]
    }

    fn account_info_request(&self) -> ApiRequest {
        ApiRequest::get("users/me")
    }

    fn list_folder_request(&self, folder_id: Option<&str>, page: &PageRequest) -> ApiRequest {
        let folder = folder_id.unwrap_or(ROOT_FOLDER_ID);
        let limit = page.page_size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let offset: u64 = page
            .page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);

        ApiRequest::get(format!("folders/{}/items", folder))
            .with_query("limit", limit.to_string())
            .with_query("offset", offset.to_string())
            .with_query("fields", LIST_FIELDS)
    }

    fn extract_account_fields(&self, info: &Value) -> AccountFields {
        AccountFields {
            account_id: str_field(info, "id"),
            email: str_field(info, "login"),
            display_name: str_field(info, "name"),
        }
    }

    fn parse_listing(&self, raw: &Value, requested_folder: Option<&str>) -> FolderListing {
        let entries: Vec<FolderEntry> = raw
            .get("entries")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_entry).collect())
            .unwrap_or_default();

        let offset = raw.get("offset").and_then(Value::as_u64).unwrap_or(0);
        let total = raw.get("total_count").and_then(Value::as_u64).unwrap_or(0);
        let next_offset = offset + entries.len() as u64;
        let has_more = next_offset < total;

        FolderListing {
            path: requested_folder.unwrap_or(ROOT_FOLDER_ID).to_string(),
            entries,
            has_more,
            cursor: has_more.then(|| next_offset.to_string()),
        }
    }

    fn revoke_request(
        &self,
        credentials: &ProviderCredentials,
        access_token: &str,
    ) -> Option<RevokeRequest> {
        Some(RevokeRequest::Form {
            url: REVOKE_URL.to_string(),
            params: vec![
                ("token".to_string(), access_token.to_string()),
                ("client_id".to_string(), credentials.client_id.clone()),
                ("client_secret".to_string(), credentials.client_secret.clone()),
            ],
        })
    }
}

fn parse_entry(item: &Value) -> FolderEntry {
    let kind = if item.get("type").and_then(Value::as_str) == Some("folder") {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    let name = str_field(item, "name");

    FolderEntry {
        path: entry_path(item, &name),
        name,
        kind,
        size: item.get("size").and_then(Value::as_u64),
        modified: item
            .get("modified_at")
            .and_then(Value::as_str)
            .map(str::to_string),
        id: item.get("id").and_then(Value::as_str).map(str::to_string),
    }
}

/// Joins the `path_collection` ancestors with the entry name. The root
/// ancestor is "All Files", which maps to the leading slash.
fn entry_path(item: &Value, name: &str) -> String {
    let ancestors = item
        .get("path_collection")
        .and_then(|p| p.get("entries"))
        .and_then(Value::as_array);

    match ancestors {
        Some(parents) => {
            let mut path = String::new();
            for parent in parents.iter().skip(1) {
                path.push('/');
                path.push_str(str_field(parent, "name").as_str());
            }
            path.push('/');
            path.push_str(name);
            path
        }
        None => name.to_string(),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
