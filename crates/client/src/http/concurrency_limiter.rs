//! Per-host concurrency limits for CRM requests.
//!
//! Limiters are keyed by host and shared by every client talking to that
//! host, so opening several workspaces against the same organisation does
//! not multiply the number of requests in flight.
//!
//! ```bash
//! export CRMDESK_CONCURRENCY_LIMIT_READ=8    # at most 8 GETs at once
//! export CRMDESK_CONCURRENCY_LIMIT_WRITE=2   # at most 2 POST/PATCH at once
//! ```
//!
//! Limits are opt-in. Without configuration no semaphore is created and
//! acquiring a permit is free.

use std::sync::Arc;

use crmdesk_query::Method;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Maximum concurrent reads and writes. `None` or zero means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcurrencyLimitConfig {
    pub max_concurrent_reads: Option<usize>,
    pub max_concurrent_writes: Option<usize>,
}

impl ConcurrencyLimitConfig {
    pub fn new(max_concurrent_reads: Option<usize>, max_concurrent_writes: Option<usize>) -> Self {
        Self {
            max_concurrent_reads,
            max_concurrent_writes,
        }
    }

    /// Read `CRMDESK_CONCURRENCY_LIMIT_READ` and `CRMDESK_CONCURRENCY_LIMIT_WRITE`.
    ///
    /// Returns `None` if neither is set to a number.
    pub fn from_env() -> Option<Self> {
        let read = std::env::var("CRMDESK_CONCURRENCY_LIMIT_READ")
            .ok()
            .and_then(|s| s.parse::<usize>().ok());
        let write = std::env::var("CRMDESK_CONCURRENCY_LIMIT_WRITE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok());

        if read.is_none() && write.is_none() {
            return None;
        }
        debug!(
            "concurrency limits from environment: read={:?}, write={:?}",
            read, write
        );
        Some(Self::new(read, write))
    }
}

type SharedSemaphore = Arc<Semaphore>;

static GLOBAL_SEMAPHORES: Lazy<DashMap<String, (Option<SharedSemaphore>, Option<SharedSemaphore>)>> =
    Lazy::new(DashMap::new);

/// Read and write semaphores of one host.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyLimiter {
    read: Option<SharedSemaphore>,
    write: Option<SharedSemaphore>,
}

impl ConcurrencyLimiter {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// The limiter shared by every client of `host`.
    ///
    /// The first caller for a host decides its limits; later configs for the
    /// same host are ignored.
    pub fn for_host(host: &str, config: &ConcurrencyLimitConfig) -> Self {
        let (read, write) = GLOBAL_SEMAPHORES
            .entry(host.to_string())
            .or_insert_with(|| {
                debug!(
                    "creating semaphores for host {}: read={:?}, write={:?}",
                    host, config.max_concurrent_reads, config.max_concurrent_writes
                );
                let read = config
                    .max_concurrent_reads
                    .filter(|&n| n > 0)
                    .map(|n| Arc::new(Semaphore::new(n)));
                let write = config
                    .max_concurrent_writes
                    .filter(|&n| n > 0)
                    .map(|n| Arc::new(Semaphore::new(n)));
                (read, write)
            })
            .value()
            .clone();

        Self { read, write }
    }

    /// Wait for a slot for `method`. The slot is released when the permit drops.
    pub async fn acquire(&self, method: Method) -> Option<OwnedSemaphorePermit> {
        let semaphore = if method.is_read() {
            self.read.as_ref()
        } else {
            self.write.as_ref()
        }?;
        // closed semaphores are never produced here, treat it as unlimited
        semaphore.clone().acquire_owned().await.ok()
    }

    pub fn is_limited(&self) -> bool {
        self.read.is_some() || self.write.is_some()
    }
}

/// Forget every host's semaphores. Mostly for tests.
pub fn clear_all_semaphores() {
    GLOBAL_SEMAPHORES.clear();
    debug!("cleared all concurrency limiters");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_host_shares_semaphores() {
        let config = ConcurrencyLimitConfig::new(Some(4), Some(1));
        let a = ConcurrencyLimiter::for_host("shared.crm.test", &config);
        let b = ConcurrencyLimiter::for_host("shared.crm.test", &ConcurrencyLimitConfig::default());

        assert!(Arc::ptr_eq(a.read.as_ref().unwrap(), b.read.as_ref().unwrap()));
        assert!(Arc::ptr_eq(a.write.as_ref().unwrap(), b.write.as_ref().unwrap()));
    }

    #[test]
    fn test_different_hosts_are_independent() {
        let config = ConcurrencyLimitConfig::new(Some(4), None);
        let a = ConcurrencyLimiter::for_host("one.crm.test", &config);
        let b = ConcurrencyLimiter::for_host("two.crm.test", &config);

        assert!(!Arc::ptr_eq(a.read.as_ref().unwrap(), b.read.as_ref().unwrap()));
        assert!(a.write.is_none());
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let config = ConcurrencyLimitConfig::new(Some(0), Some(0));
        let limiter = ConcurrencyLimiter::for_host("zero.crm.test", &config);
        assert!(!limiter.is_limited());
    }

    #[tokio::test]
    async fn test_write_permit_blocks_second_writer() {
        let config = ConcurrencyLimitConfig::new(None, Some(1));
        let limiter = ConcurrencyLimiter::for_host("writer.crm.test", &config);

        let first = limiter.acquire(Method::Post).await;
        assert!(first.is_some());
        assert!(limiter.acquire(Method::Get).await.is_none());

        let write = limiter.write.clone().unwrap();
        assert_eq!(write.available_permits(), 0);
        drop(first);
        assert_eq!(write.available_permits(), 1);
    }
}
