//! Batch refresh sweep.
//!
//! Proactively refreshes tokens that will expire soon, so interactive
//! requests rarely pay refresh latency. One failing record never stops
//! the sweep; failures are logged and counted.

use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ProviderCredentials;
use crate::connection::{Connection, Principal};
use crate::error::Result;
use crate::provider::CloudProvider;
use crate::store::CredentialStore;

/// Default sweep window: tokens expiring within the next six hours.
pub const DEFAULT_SWEEP_WINDOW_HOURS: i64 = 6;

/// Outcome of one sweep run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Refreshes every active record for `provider` whose expiry falls
/// within `(now, now + window]` and which has a refresh token. Already
/// expired records are left alone; they are handled on demand.
///
/// Only selection errors fail the sweep. Per-record refresh failures
/// are logged and reflected in the summary counts.
pub async fn refresh_expiring_tokens(
    store: Arc<CredentialStore>,
    provider: Arc<dyn CloudProvider>,
    credentials: &ProviderCredentials,
    window: Option<Duration>,
) -> Result<SweepSummary> {
    let window = window.unwrap_or_else(|| Duration::hours(DEFAULT_SWEEP_WINDOW_HOURS));
    let expiring = store.expiring_within(provider.name(), window)?;

    let mut summary = SweepSummary {
        attempted: expiring.len(),
        succeeded: 0,
    };

    for record in expiring {
        let conn = Connection::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            credentials.clone(),
            Principal::new(record.user_id.clone()),
        );
        match conn.refresh_access_token().await {
            Ok(_) => summary.succeeded += 1,
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    principal = %record.user_id,
                    error = %e,
                    "sweep refresh failed"
                );
            }
        }
    }

    info!(
        provider = provider.name(),
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        "token refresh sweep complete"
    );
    Ok(summary)
}
