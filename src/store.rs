//! Encrypted credential storage using SQLite.
//!
//! One row per (user, provider) pair, unique on that key. Tokens are
//! encrypted at rest through the [`TokenCipher`]; reading decrypts and
//! writing encrypts, so callers never see or handle ciphertext.
//!
//! Disconnecting is a soft delete: `is_active` flips to 0 and the row is
//! retained for audit. A later reconnect re-activates the same row via
//! upsert rather than inserting a duplicate.
//!
//! # Thread Safety
//! The connection is wrapped in a Mutex; each upsert happens entirely
//! under the lock, so no partial write is ever visible to another caller.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::cipher::TokenCipher;
use crate::error::{Error, Result};
use crate::provider::AccountFields;

/// Persisted token and identity record for one (user, provider) pair.
///
/// Token fields are decrypted; this struct never leaves the process.
#[derive(Clone, Debug)]
pub struct CredentialRecord {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub account_id: String,
    pub email: String,
    pub display_name: String,
    pub scopes: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl CredentialRecord {
    /// True if `expires_at` has passed. Records without an expiry never
    /// expire.
    pub fn is_token_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// True if the token expires within `buffer` from now. Records
    /// without an expiry never need refresh.
    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at - buffer,
            None => false,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Fields written by a token save. `None` on the optional fields means
/// "keep whatever is stored": a refresh response without a rotated
/// refresh token must not clear the existing one.
#[derive(Clone, Debug)]
pub struct CredentialWrite {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
    pub account: Option<AccountFields>,
}

/// Encrypted credential storage backed by SQLite.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl CredentialStore {
    /// Creates or opens a credential store at `db_path` (":memory:" for
    /// tests). The cipher is threaded in at construction; the store never
    /// reads ambient key configuration.
    pub fn new<P: AsRef<Path>>(db_path: P, cipher: TokenCipher) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_type TEXT NOT NULL DEFAULT 'bearer',
                expires_at TEXT,
                account_id TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                display_name TEXT NOT NULL DEFAULT '',
                scopes TEXT NOT NULL DEFAULT '[]',
                connected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                UNIQUE(user_id, provider)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_active ON credentials(user_id, is_active)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_expires_at ON credentials(expires_at)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Retrieves the active record for a user and provider, decrypted.
    /// Inactive (disconnected) rows are not returned.
    pub fn load(&self, user_id: &str, provider: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.conn.lock().unwrap();
        query_record(&conn, &self.cipher, user_id, provider, true)
    }

    /// Creates or updates the record for a user and provider.
    ///
    /// Targets the (user, provider) key: an existing row, active or
    /// soft-deleted, is updated in place and re-activated; otherwise a
    /// new row is inserted. Returns the written record and whether it was
    /// created. Atomic with respect to other callers of this store.
    pub fn upsert(
        &self,
        user_id: &str,
        provider: &str,
        write: &CredentialWrite,
    ) -> Result<(CredentialRecord, bool)> {
        if write.access_token.is_empty() {
            return Err(Error::Storage(
                "refusing to store an active record with an empty access token".to_string(),
            ));
        }

        let conn = self.conn.lock().unwrap();
        let existing = query_record(&conn, &self.cipher, user_id, provider, false)?;
        let now = Utc::now();

        let access_token = self.cipher.encrypt(&write.access_token);
        let refresh_token = write
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t));
        let expires_at = write.expires_at.map(|dt| dt.to_rfc3339());
        let scopes_json = write
            .scopes
            .as_ref()
            .map(|s| serde_json::to_string(s))
            .transpose()
            .map_err(|e| Error::Storage(format!("failed to encode scopes: {}", e)))?;

        let created = match existing {
            Some(_) => {
                conn.execute(
                    r#"
                    UPDATE credentials SET
                        access_token = ?3,
                        refresh_token = COALESCE(?4, refresh_token),
                        token_type = ?5,
                        expires_at = ?6,
                        scopes = COALESCE(?7, scopes),
                        account_id = COALESCE(?8, account_id),
                        email = COALESCE(?9, email),
                        display_name = COALESCE(?10, display_name),
                        updated_at = ?11,
                        is_active = 1
                    WHERE user_id = ?1 AND provider = ?2
                    "#,
                    params![
                        user_id,
                        provider,
                        access_token,
                        refresh_token,
                        write.token_type,
                        expires_at,
                        scopes_json,
                        write.account.as_ref().map(|a| a.account_id.as_str()),
                        write.account.as_ref().map(|a| a.email.as_str()),
                        write.account.as_ref().map(|a| a.display_name.as_str()),
                        now.to_rfc3339(),
                    ],
                )?;
                false
            }
            None => {
                let account = write.account.clone().unwrap_or_default();
                conn.execute(
                    r#"
                    INSERT INTO credentials (
                        user_id, provider, access_token, refresh_token,
                        token_type, expires_at, account_id, email,
                        display_name, scopes, connected_at, updated_at, is_active
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)
                    "#,
                    params![
                        user_id,
                        provider,
                        access_token,
                        refresh_token,
                        write.token_type,
                        expires_at,
                        account.account_id,
                        account.email,
                        account.display_name,
                        scopes_json.unwrap_or_else(|| "[]".to_string()),
                        now.to_rfc3339(),
                        now.to_rfc3339(),
                    ],
                )?;
                true
            }
        };

        let record = query_record(&conn, &self.cipher, user_id, provider, true)?
            .ok_or_else(|| Error::Storage("record missing after upsert".to_string()))?;

        Ok((record, created))
    }

    /// Soft-deletes the record for a user and provider. Token material
    /// and timestamps survive for audit; only `is_active` changes.
    ///
    /// Returns false if there was no active record (already disconnected).
    pub fn deactivate(&self, user_id: &str, provider: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE credentials SET is_active = 0, updated_at = ?3
             WHERE user_id = ?1 AND provider = ?2 AND is_active = 1",
            params![user_id, provider, Utc::now().to_rfc3339()],
        )?;
        Ok(rows > 0)
    }

    /// Active records for a provider with a refresh token whose expiry
    /// falls within `(now, now + window]`. This is the batch refresh sweep's
    /// selection.
    pub fn expiring_within(&self, provider: &str, window: Duration) -> Result<Vec<CredentialRecord>> {
        let records = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT user_id, provider, access_token, refresh_token, token_type,
                        expires_at, account_id, email, display_name, scopes,
                        connected_at, updated_at, is_active
                 FROM credentials
                 WHERE provider = ?1 AND is_active = 1
                   AND refresh_token IS NOT NULL AND refresh_token != ''
                   AND expires_at IS NOT NULL
                 ORDER BY expires_at",
            )?;
            let rows = stmt.query_map(params![provider], |row| row_to_raw(row))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let now = Utc::now();
        let cutoff = now + window;
        let mut expiring = Vec::new();
        for raw in records {
            let record = raw_to_record(raw, &self.cipher)?;
            if let Some(expires_at) = record.expires_at {
                if expires_at > now && expires_at <= cutoff {
                    expiring.push(record);
                }
            }
        }
        Ok(expiring)
    }

    /// User IDs with an active connection for a provider.
    pub fn list_connected(&self, provider: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id FROM credentials
             WHERE provider = ?1 AND is_active = 1
             ORDER BY user_id",
        )?;
        let users = stmt
            .query_map(params![provider], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(users)
    }
}

/// Raw row before decryption and timestamp parsing.
struct RawRow {
    user_id: String,
    provider: String,
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_at: Option<String>,
    account_id: String,
    email: String,
    display_name: String,
    scopes: String,
    connected_at: String,
    updated_at: String,
    is_active: bool,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        user_id: row.get(0)?,
        provider: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        token_type: row.get(4)?,
        expires_at: row.get(5)?,
        account_id: row.get(6)?,
        email: row.get(7)?,
        display_name: row.get(8)?,
        scopes: row.get(9)?,
        connected_at: row.get(10)?,
        updated_at: row.get(11)?,
        is_active: row.get(12)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("failed to parse timestamp: {}", e)))
}

fn raw_to_record(raw: RawRow, cipher: &TokenCipher) -> Result<CredentialRecord> {
    let expires_at = raw.expires_at.as_deref().map(parse_timestamp).transpose()?;
    let scopes: Vec<String> = serde_json::from_str(&raw.scopes)
        .map_err(|e| Error::Storage(format!("failed to decode scopes: {}", e)))?;

    Ok(CredentialRecord {
        access_token: cipher.decrypt(&raw.access_token),
        refresh_token: raw
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| cipher.decrypt(t)),
        user_id: raw.user_id,
        provider: raw.provider,
        token_type: raw.token_type,
        expires_at,
        account_id: raw.account_id,
        email: raw.email,
        display_name: raw.display_name,
        scopes,
        connected_at: parse_timestamp(&raw.connected_at)?,
        updated_at: parse_timestamp(&raw.updated_at)?,
        is_active: raw.is_active,
    })
}

fn query_record(
    conn: &Connection,
    cipher: &TokenCipher,
    user_id: &str,
    provider: &str,
    active_only: bool,
) -> Result<Option<CredentialRecord>> {
    let sql = if active_only {
        "SELECT user_id, provider, access_token, refresh_token, token_type,
                expires_at, account_id, email, display_name, scopes,
                connected_at, updated_at, is_active
         FROM credentials
         WHERE user_id = ?1 AND provider = ?2 AND is_active = 1"
    } else {
        "SELECT user_id, provider, access_token, refresh_token, token_type,
                expires_at, account_id, email, display_name, scopes,
                connected_at, updated_at, is_active
         FROM credentials
         WHERE user_id = ?1 AND provider = ?2"
    };

    let raw = conn
        .query_row(sql, params![user_id, provider], row_to_raw)
        .optional()?;

    raw.map(|r| raw_to_record(r, cipher)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn create_test_store() -> CredentialStore {
        let key = BASE64.encode([0u8; 32]);
        let cipher = TokenCipher::new(Some(&key)).unwrap();
        CredentialStore::new(":memory:", cipher).expect("failed to create test store")
    }

    fn basic_write() -> CredentialWrite {
        CredentialWrite {
            access_token: "access-token-12345".to_string(),
            refresh_token: Some("refresh-token-67890".to_string()),
            token_type: "bearer".to_string(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            scopes: Some(vec!["files.read".to_string()]),
            account: None,
        }
    }

    #[test]
    fn test_upsert_and_load() {
        let store = create_test_store();

        let (record, created) = store.upsert("user1", "dropbox", &basic_write()).unwrap();
        assert!(created);
        assert!(record.is_active);
        assert_eq!(record.access_token, "access-token-12345");
        assert_eq!(record.refresh_token.as_deref(), Some("refresh-token-67890"));
        assert_eq!(record.scopes, vec!["files.read"]);

        let loaded = store.load("user1", "dropbox").unwrap().unwrap();
        assert_eq!(loaded.access_token, "access-token-12345");
        assert_eq!(loaded.connected_at, record.connected_at);
    }

    #[test]
    fn test_load_nonexistent() {
        let store = create_test_store();
        assert!(store.load("user1", "dropbox").unwrap().is_none());
    }

    #[test]
    fn test_tokens_encrypted_at_rest() {
        let store = create_test_store();
        store.upsert("user1", "dropbox", &basic_write()).unwrap();

        let stored: String = {
            let conn = store.conn.lock().unwrap();
            conn.query_row(
                "SELECT access_token FROM credentials WHERE user_id = 'user1'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_ne!(stored, "access-token-12345");
    }

    #[test]
    fn test_upsert_preserves_refresh_token_when_absent() {
        let store = create_test_store();
        store.upsert("user1", "dropbox", &basic_write()).unwrap();

        // Refresh response carries no rotated refresh token
        let refresh_write = CredentialWrite {
            access_token: "new-access".to_string(),
            refresh_token: None,
            token_type: "bearer".to_string(),
            expires_at: Some(Utc::now() + Duration::hours(4)),
            scopes: None,
            account: None,
        };
        let (record, created) = store.upsert("user1", "dropbox", &refresh_write).unwrap();

        assert!(!created);
        assert_eq!(record.access_token, "new-access");
        assert_eq!(record.refresh_token.as_deref(), Some("refresh-token-67890"));
        assert_eq!(record.scopes, vec!["files.read"]);
    }

    #[test]
    fn test_upsert_reactivates_soft_deleted_row() {
        let store = create_test_store();
        store.upsert("user1", "dropbox", &basic_write()).unwrap();
        assert!(store.deactivate("user1", "dropbox").unwrap());
        assert!(store.load("user1", "dropbox").unwrap().is_none());

        // Reconnect targets the same row, no duplicate
        let (record, created) = store.upsert("user1", "dropbox", &basic_write()).unwrap();
        assert!(!created);
        assert!(record.is_active);

        let count: i64 = {
            let conn = store.conn.lock().unwrap();
            conn.query_row(
                "SELECT COUNT(*) FROM credentials WHERE user_id = 'user1' AND provider = 'dropbox'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(count, 1);
    }

    #[test]
    fn test_deactivate_retains_token_material() {
        let store = create_test_store();
        store.upsert("user1", "dropbox", &basic_write()).unwrap();
        store.deactivate("user1", "dropbox").unwrap();

        let conn = store.conn.lock().unwrap();
        let (token, active): (String, bool) = conn
            .query_row(
                "SELECT access_token, is_active FROM credentials WHERE user_id = 'user1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!active);
        assert!(!token.is_empty());
    }

    #[test]
    fn test_deactivate_twice_second_is_noop() {
        let store = create_test_store();
        store.upsert("user1", "dropbox", &basic_write()).unwrap();
        assert!(store.deactivate("user1", "dropbox").unwrap());
        assert!(!store.deactivate("user1", "dropbox").unwrap());
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let store = create_test_store();
        let mut write = basic_write();
        write.access_token = String::new();
        assert!(store.upsert("user1", "dropbox", &write).is_err());
    }

    #[test]
    fn test_same_user_different_providers() {
        let store = create_test_store();
        store.upsert("user1", "dropbox", &basic_write()).unwrap();
        store.upsert("user1", "google_drive", &basic_write()).unwrap();

        assert!(store.load("user1", "dropbox").unwrap().is_some());
        assert!(store.load("user1", "google_drive").unwrap().is_some());
        assert_eq!(store.list_connected("dropbox").unwrap(), vec!["user1"]);
    }

    #[test]
    fn test_expiring_within_window() {
        let store = create_test_store();

        let mut soon = basic_write();
        soon.expires_at = Some(Utc::now() + Duration::hours(2));
        store.upsert("user-soon", "dropbox", &soon).unwrap();

        let mut later = basic_write();
        later.expires_at = Some(Utc::now() + Duration::hours(10));
        store.upsert("user-later", "dropbox", &later).unwrap();

        let mut no_refresh = basic_write();
        no_refresh.expires_at = Some(Utc::now() + Duration::hours(2));
        no_refresh.refresh_token = None;
        store.upsert("user-no-refresh", "dropbox", &no_refresh).unwrap();

        let expiring = store.expiring_within("dropbox", Duration::hours(6)).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].user_id, "user-soon");
    }

    #[test]
    fn test_expiring_within_skips_inactive() {
        let store = create_test_store();
        let mut soon = basic_write();
        soon.expires_at = Some(Utc::now() + Duration::hours(2));
        store.upsert("user1", "dropbox", &soon).unwrap();
        store.deactivate("user1", "dropbox").unwrap();

        let expiring = store.expiring_within("dropbox", Duration::hours(6)).unwrap();
        assert!(expiring.is_empty());
    }

    #[test]
    fn test_needs_refresh_buffer() {
        let store = create_test_store();

        let mut write = basic_write();
        write.expires_at = Some(Utc::now() + Duration::minutes(4));
        let (record, _) = store.upsert("u", "dropbox", &write).unwrap();
        assert!(record.needs_refresh(Duration::minutes(5)));

        write.expires_at = Some(Utc::now() + Duration::minutes(10));
        let (record, _) = store.upsert("u", "dropbox", &write).unwrap();
        assert!(!record.needs_refresh(Duration::minutes(5)));

        write.expires_at = None;
        let (record, _) = store.upsert("u", "dropbox", &write).unwrap();
        assert!(!record.needs_refresh(Duration::minutes(5)));
        assert!(!record.is_token_expired());
    }

    #[test]
    fn test_legacy_plaintext_row_loads() {
        // Row written before encryption was configured
        let store = create_test_store();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO credentials (user_id, provider, access_token, connected_at, updated_at)
                 VALUES ('legacy', 'dropbox', 'plain-old-token', ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        let record = store.load("legacy", "dropbox").unwrap().unwrap();
        assert_eq!(record.access_token, "plain-old-token");
    }
}
