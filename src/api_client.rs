//! Authenticated request executor.
//!
//! Every provider API call flows through [`ApiClient::execute`]: validate
//! the token first, attach it as a bearer header, send with a bounded
//! timeout, and classify the outcome into the error taxonomy. Network
//! failures are reported without the request's token material; HTTP
//! error statuses carry the provider's own error detail.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::provider::{ApiRequest, CloudProvider};

/// Timeout for provider API calls.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded exponential backoff parameters.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.factor.powi(attempt as i32))
    }
}

/// Runs `operation` with bounded exponential backoff, retrying only
/// failures `retryable` accepts. The last error is returned when
/// attempts are exhausted; a non-retryable failure propagates
/// immediately with no delay.
pub async fn retry_with_backoff<T, F, Fut, P>(
    mut operation: F,
    policy: RetryPolicy,
    retryable: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && retryable(&e) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Executor for authenticated provider API calls, bound to one
/// connection. Cheap to construct per call site.
pub struct ApiClient<'a> {
    conn: &'a Connection,
}

impl<'a> ApiClient<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Absolute request URL for a descriptor path: already-absolute paths
    /// pass through, relative paths join the provider's API base.
    pub(crate) fn resolve_url(provider: &dyn CloudProvider, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                provider.api_base_url().trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }

    /// Executes a request descriptor and returns the parsed JSON body.
    ///
    /// The token is validated (and refreshed if needed) before the call.
    /// Outcomes map onto the taxonomy: network failure to [`Error::Api`]
    /// with no status, 429 to [`Error::RateLimit`], any other error
    /// status to [`Error::Api`] with the status and the provider's error
    /// detail. An empty success body parses as JSON null.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        let token = self.conn.ensure_valid().await?;
        let provider = self.conn.provider();
        let url = Self::resolve_url(provider, &request.path);

        debug!(provider = provider.name(), method = %request.method, path = %request.path, "provider api call");

        let mut builder = self
            .conn
            .http()
            .request(request.method, url)
            .bearer_auth(&token)
            .timeout(API_TIMEOUT);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.json_body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|e| {
            // No URL or header material in the message: reqwest errors
            // can echo the request back
            let kind = if e.is_timeout() {
                "timed out"
            } else if e.is_connect() {
                "connection error"
            } else {
                "request failed"
            };
            Error::Api {
                status_code: None,
                message: format!("{} api call {}", provider.display_name(), kind),
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if status == 429 {
            let detail = provider.extract_error_detail(status, &body);
            warn!(provider = provider.name(), "rate limited by provider");
            return Err(Error::RateLimit(detail));
        }
        if !(200..300).contains(&status) {
            return Err(Error::Api {
                status_code: Some(status),
                message: provider.extract_error_detail(status, &body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| Error::Api {
            status_code: Some(status),
            message: format!("invalid JSON in {} response: {}", provider.display_name(), e),
        })
    }
}
