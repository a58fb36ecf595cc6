//! Sending requests: transports, retries and concurrency limits.

pub mod concurrency_limiter;
mod fixture;
mod retry;
mod transport;

pub use concurrency_limiter::{ConcurrencyLimitConfig, ConcurrencyLimiter};
pub use fixture::{Fixture, FixtureTransport};
pub use retry::{send_with_retry, RetryPolicy};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
