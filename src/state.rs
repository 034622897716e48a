//! Single-use authorization state.
//!
//! `authorize` issues an opaque token binding the pending flow to a
//! provider, principal, and the exact redirect URI the authorization URL
//! was built with; `callback` redeems the token at most once. Entries
//! live in memory, lapse after a TTL fixed at construction, and stale
//! ones are swept out whenever a new state is issued.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::connection::Principal;

/// How long an issued state stays redeemable.
pub const DEFAULT_STATE_TTL_MINUTES: i64 = 10;

/// An authorization flow awaiting its callback.
#[derive(Clone, Debug)]
pub struct PendingAuth {
    pub provider: String,
    pub principal: Principal,
    /// Redirect URI the flow was started with. The code exchange must
    /// present the same value, so it travels with the state instead of
    /// being recomputed at callback time.
    pub redirect_uri: String,
    issued_at: DateTime<Utc>,
}

/// Issues and redeems single-use CSRF state tokens.
#[derive(Clone)]
pub struct StateManager {
    pending: Arc<Mutex<HashMap<String, PendingAuth>>>,
    ttl: Duration,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_STATE_TTL_MINUTES))
    }
}

impl StateManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Issues an unguessable state token for a flow about to be handed
    /// to the provider. Lapsed entries are dropped on the way, so the
    /// map never grows past the abandoned-flow window.
    pub fn issue(&self, provider: &str, principal: &Principal, redirect_uri: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut pending = self.pending.lock().unwrap();
        pending.retain(|_, entry| now - entry.issued_at <= self.ttl);
        pending.insert(
            token.clone(),
            PendingAuth {
                provider: provider.to_string(),
                principal: principal.clone(),
                redirect_uri: redirect_uri.to_string(),
                issued_at: now,
            },
        );
        token
    }

    /// Redeems a state token, yielding the pending flow only for a
    /// known, unexpired token. Redemption consumes the token; a replay
    /// of the same callback gets nothing.
    pub fn redeem(&self, token: &str) -> Option<PendingAuth> {
        let entry = self.pending.lock().unwrap().remove(token)?;
        if Utc::now() - entry.issued_at > self.ttl {
            return None;
        }
        Some(entry)
    }

    /// Unredeemed entries, lapsed ones included until the next issue.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
