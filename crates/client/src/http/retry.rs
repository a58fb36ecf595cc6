//! Retrying requests with exponential backoff.

use std::time::Duration;

use tap::TapFallible;
use tracing::{error, warn};

use super::{
    concurrency_limiter::ConcurrencyLimiter,
    transport::{HttpRequest, HttpResponse, Transport},
};
use crate::{QueryError, QueryResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (starting at 0): the base delay
    /// doubled each time, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Send `request`, retrying transient failures according to `policy`.
///
/// A non-2xx answer becomes [`QueryError::Status`]. Client errors (4xx)
/// fail immediately; once retries run out the last error is wrapped in
/// [`QueryError::RetriesExhausted`].
pub async fn send_with_retry(
    transport: &dyn Transport,
    limiter: &ConcurrencyLimiter,
    policy: &RetryPolicy,
    request: &HttpRequest,
) -> QueryResult<HttpResponse> {
    let mut retry = 0;
    loop {
        let result = {
            let _permit = limiter.acquire(request.method).await;
            transport.execute(request).await
        };

        let err = match result {
            Ok(res) if res.is_success() => return Ok(res),
            Ok(res) => QueryError::Status {
                status: res.status,
                body: res.body,
            },
            Err(e) => e,
        };

        if !err.is_transient() {
            return Err(err).tap_err(|e| error!("{} failed: {}", request.route(), e));
        }
        if retry >= policy.max_retries {
            return Err(QueryError::RetriesExhausted {
                attempts: retry + 1,
                last: Box::new(err),
            })
            .tap_err(|e| error!("{}: {}", request.route(), e));
        }

        let delay = policy.delay_for(retry);
        warn!(
            "{} failed ({}), retrying in {:?}",
            request.route(),
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
