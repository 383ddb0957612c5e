use std::sync::Arc;

use serde_json::Value;

use super::{
    backoff::{BackoffPolicy, NetworkRetry},
    envelope::ApiEnvelope,
    session::{RawResponse, SessionManager},
};
use crate::{
    clock::Sleeper,
    errors::{FusionError, FusionResult},
};

/// Result of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Structured body. Its business `success` flag is not inspected here.
    Payload(ApiEnvelope),
    /// Successful status with a body that is not JSON.
    Empty,
    /// Rate limiting outlasted the retry budget; carries the last rejection.
    Skipped(ApiEnvelope),
}

/// Sends requests through the session and applies the vendor's relogin and
/// rate-limit protocol.
///
/// Responses are classified in a fixed order: unparseable body, session
/// expiry (relogin and resend, unbounded), rate limiting (backoff, fresh
/// session, resend, bounded per call), then plain status validation.
pub struct RequestExecutor {
    session: SessionManager,
    backoff: BackoffPolicy,
    network: NetworkRetry,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestExecutor {
    pub fn new(
        session: SessionManager,
        backoff: BackoffPolicy,
        network: NetworkRetry,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            session,
            backoff,
            network,
            sleeper,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Send one logical request. The rate-limit counter covers this call only.
    pub async fn execute(&mut self, path: &str, body: &Value) -> FusionResult<Reply> {
        let mut rate_limited: u32 = 0;

        loop {
            let raw = self.send(path, body).await?;

            let envelope = match serde_json::from_str::<Value>(&raw.body) {
                Ok(value) => ApiEnvelope::new(value),
                Err(_) => {
                    ensure_success(&raw)?;
                    tracing::debug!(path, status = raw.status.as_u16(), "non-JSON response body");
                    return Ok(Reply::Empty);
                }
            };

            if envelope.requires_relogin() {
                tracing::warn!(path, "vendor requires relogin, refreshing session");
                metrics::counter!("fusion_relogins_total").increment(1);
                self.session.invalidate();
                self.session.establish().await?;
                continue;
            }

            if envelope.is_rate_limited() {
                rate_limited += 1;
                metrics::counter!("fusion_rate_limited_total").increment(1);

                if rate_limited > self.backoff.max_retries {
                    tracing::warn!(
                        path,
                        attempts = rate_limited,
                        response = %envelope,
                        "rate limit persisted, giving up on this unit of work"
                    );
                    return Ok(Reply::Skipped(envelope));
                }

                let wait = self.backoff.delay(rate_limited);
                tracing::warn!(
                    path,
                    attempt = rate_limited,
                    max_retries = self.backoff.max_retries,
                    wait_secs = wait.as_secs_f64(),
                    "rate limited by vendor, backing off"
                );
                self.sleeper.sleep(wait).await?;

                self.session.invalidate();
                self.session.establish().await?;
                continue;
            }

            ensure_success(&raw)?;
            return Ok(Reply::Payload(envelope));
        }
    }

    /// One HTTP exchange with bounded retries for network failures and gateway errors.
    async fn send(&mut self, path: &str, body: &Value) -> FusionResult<RawResponse> {
        let mut attempt: u32 = 0;

        loop {
            metrics::counter!("fusion_requests_total").increment(1);
            match self.session.post_json(path, body).await {
                Ok(raw)
                    if NetworkRetry::RETRYABLE_STATUSES.contains(&raw.status.as_u16())
                        && attempt < self.network.total =>
                {
                    attempt += 1;
                    tracing::warn!(path, status = raw.status.as_u16(), attempt, "gateway error, retrying");
                    self.sleeper.sleep(self.network.delay(attempt)).await?;
                }
                Err(FusionError::Network(e)) if is_retryable(&e) && attempt < self.network.total => {
                    attempt += 1;
                    tracing::warn!(path, error = %e, attempt, "network error, retrying");
                    self.sleeper.sleep(self.network.delay(attempt)).await?;
                }
                other => return other,
            }
        }
    }
}

fn is_retryable(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

fn ensure_success(raw: &RawResponse) -> FusionResult<()> {
    if raw.status.is_success() {
        return Ok(());
    }
    let body: String = raw.body.chars().take(600).collect();
    Err(FusionError::Transport {
        status: raw.status.as_u16(),
        body,
    })
}
