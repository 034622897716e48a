//! OneDrive (Microsoft Graph) adapter.
//!
//! Listings come from the drive children collections; paging uses the
//! absolute `@odata.nextLink` URL Graph hands back, which flows through
//! the executor unchanged. Graph has no revoke endpoint, so disconnect
//! only deactivates the stored record.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ProviderCredentials;
use crate::provider::{
    AccountFields, ApiRequest, CloudProvider, EntryKind, FolderEntry, FolderListing,
    PageRequest,
};

const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 200;

pub struct OneDrive;

#[async_trait]
impl CloudProvider for OneDrive {
    fn name(&self) -> &'static str {
        "onedrive"
    }

    fn display_name(&self) -> &'static str {
        "OneDrive"
    }

    fn api_base_url(&self) -> &'static str {
        "https://graph.microsoft.com/v1.0"
    }

    fn auth_url(&self) -> &'static str {
        "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
    }

    fn token_url(&self) -> &'static str {
        "https://login.microsoftonline.com/common/oauth2/v2.0/token"
    }

    fn default_scopes(&self) -> &'static [&'static str] {
        &["offline_access", "Files.Read", "Files.Read.All", "User.Read"]
    }

    fn extra_auth_params(&self) -> Vec<(&'static str, &'static str)> {
        vec![("response_mode", "query")]
    }

    fn account_info_request(&self) -> ApiRequest {
        ApiRequest::get("me")
    }

    fn list_folder_request(&self, folder_id: Option<&str>, page: &PageRequest) -> ApiRequest {
        // nextLink is a complete URL with the paging state baked in
        if let Some(next_link) = &page.page_token {
            return ApiRequest::get(next_link.clone());
        }

        let path = match folder_id {
            Some(id) if id != "root" => format!("me/drive/items/{}/children", id),
            _ => "me/drive/root/children".to_string(),
        };
        let top = page.page_size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        ApiRequest::get(path).with_query("$top", top.to_string())
    }

    fn extract_account_fields(&self, info: &Value) -> AccountFields {
        let email = match str_field(info, "userPrincipalName") {
            s if !s.is_empty() => s,
            _ => str_field(info, "mail"),
        };
        AccountFields {
            account_id: str_field(info, "id"),
            email,
            display_name: str_field(info, "displayName"),
        }
    }

    fn parse_listing(&self, raw: &Value, requested_folder: Option<&str>) -> FolderListing {
        let entries = raw
            .get("value")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_entry).collect())
            .unwrap_or_default();

        let cursor = raw
            .get("@odata.nextLink")
            .and_then(Value::as_str)
            .map(str::to_string);

        FolderListing {
            path: requested_folder.unwrap_or("root").to_string(),
            entries,
            has_more: cursor.is_some(),
            cursor,
        }
    }
}

fn parse_entry(item: &Value) -> FolderEntry {
    let kind = if item.get("folder").is_some() {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    let name = str_field(item, "name");

    FolderEntry {
        path: name.clone(),
        name,
        kind,
        size: item.get("size").and_then(Value::as_u64),
        modified: item
            .get("lastModifiedDateTime")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_folder_request_root_and_item() {
        let root = OneDrive.list_folder_request(None, &PageRequest::default());
        assert_eq!(root.path, "me/drive/root/children");
        assert!(root.query.contains(&("$top".to_string(), "100".to_string())));

        let item = OneDrive.list_folder_request(Some("item99"), &PageRequest::default());
        assert_eq!(item.path, "me/drive/items/item99/children");
    }

    #[test]
    fn test_next_link_passes_through_as_absolute() {
        let page = PageRequest {
            page_size: None,
            page_token: Some("https://graph.microsoft.com/v1.0/me/drive/root/children?$skiptoken=abc".to_string()),
        };
        let request = OneDrive.list_folder_request(None, &page);
        assert!(request.path.starts_with("https://"));
        assert!(request.query.is_empty());
    }

    #[test]
    fn test_parse_listing_folder_facet() {
        let raw = serde_json::json!({
            "value": [
                {"id": "i1", "name": "Photos", "folder": {"childCount": 3}},
                {"id": "i2", "name": "doc.docx", "file": {}, "size": 512,
                 "lastModifiedDateTime": "2024-02-02T08:00:00Z"},
            ],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next",
        });

        let listing = OneDrive.parse_listing(&raw, Some("root"));
        assert_eq!(listing.entries[0].kind, EntryKind::Folder);
        assert_eq!(listing.entries[1].kind, EntryKind::File);
        assert_eq!(listing.entries[1].size, Some(512));
        assert!(listing.has_more);
    }

    #[test]
    fn test_email_falls_back_to_mail() {
        let info = serde_json::json!({"id": "u1", "mail": "m@example.com", "displayName": "U"});
        let fields = OneDrive.extract_account_fields(&info);
        assert_eq!(fields.email, "m@example.com");

        let info = serde_json::json!({"id": "u1", "userPrincipalName": "p@example.com"});
        assert_eq!(OneDrive.extract_account_fields(&info).email, "p@example.com");
    }

    #[test]
    fn test_no_revoke_endpoint() {
        let credentials = ProviderCredentials {
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
        };
        assert!(OneDrive.revoke_request(&credentials, "tok").is_none());
    }
}
