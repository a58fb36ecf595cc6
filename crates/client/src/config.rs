//! Client configuration.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::Context;
use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use crate::http::{ConcurrencyLimitConfig, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5555/api/data/v9.2/";

/// Refresh interval per entity set or child collection. Anything not listed
/// falls back to [`ClientConfig::default_cache_duration`]; zero means the
/// entry never refreshes on its own.
static DEFAULT_CACHE_DURATIONS: Lazy<HashMap<String, Duration>> = Lazy::new(|| {
    [
        ("incidents", 60),
        ("Incident_Emails", 30),
        ("Incident_Annotation", 30),
        ("crmdesk_incident_crmdesk_tag", 120),
        ("email_activity_mime_attachment", 0),
        ("emails", 30),
        ("annotations", 30),
        ("accounts", 600),
        ("systemusers", 3600),
        ("crmdesk_tags", 600),
        ("templates", 0),
    ]
    .into_iter()
    .map(|(name, secs)| (name.to_string(), Duration::from_secs(secs)))
    .collect()
});

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_durations: HashMap<String, Duration>,
    pub default_cache_duration: Duration,
    pub concurrency: Option<ConcurrencyLimitConfig>,
    /// Serve requests from fixture files in this directory instead of the network.
    pub fixtures: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let base_url = Url::parse(DEFAULT_BASE_URL).expect("DEFAULT_BASE_URL is a valid url");
        Self::new(base_url)
    }
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            cache_durations: DEFAULT_CACHE_DURATIONS.clone(),
            default_cache_duration: Duration::from_secs(60),
            concurrency: None,
            fixtures: None,
        }
    }

    /// Build from `CRMDESK_*` environment variables on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = match std::env::var("CRMDESK_BASE_URL") {
            Ok(url) => Self::new(
                Url::parse(&url).with_context(|| format!("CRMDESK_BASE_URL is not a url: {url}"))?,
            ),
            Err(_) => Self::default(),
        };

        if let Ok(token) = std::env::var("CRMDESK_TOKEN") {
            config.token = Some(token);
        }
        if let Ok(attempts) = std::env::var("CRMDESK_RETRY_ATTEMPTS") {
            config.retry.max_retries = attempts
                .parse()
                .with_context(|| format!("CRMDESK_RETRY_ATTEMPTS is not a number: {attempts}"))?;
        }
        if let Ok(delay) = std::env::var("CRMDESK_RETRY_DELAY_MS") {
            let ms: u64 = delay
                .parse()
                .with_context(|| format!("CRMDESK_RETRY_DELAY_MS is not a number: {delay}"))?;
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Ok(dir) = std::env::var("CRMDESK_FIXTURES") {
            config.fixtures = Some(PathBuf::from(dir));
        }
        config.concurrency = ConcurrencyLimitConfig::from_env();

        debug!("client config from environment: {}", config.base_url);
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_duration(mut self, name: impl Into<String>, duration: Duration) -> Self {
        self.cache_durations.insert(name.into(), duration);
        self
    }

    pub fn with_default_cache_duration(mut self, duration: Duration) -> Self {
        self.default_cache_duration = duration;
        self
    }

    pub fn with_concurrency_limit(mut self, limits: ConcurrencyLimitConfig) -> Self {
        self.concurrency = Some(limits);
        self
    }

    pub fn with_fixtures(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures = Some(dir.into());
        self
    }

    /// Refresh interval for entries cached under `name`.
    pub fn cache_duration(&self, name: &str) -> Duration {
        self.cache_durations
            .get(name)
            .copied()
            .unwrap_or(self.default_cache_duration)
    }

    /// Host the concurrency limits are keyed on.
    pub fn host_key(&self) -> String {
        match (self.base_url.host_str(), self.base_url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => self.base_url.to_string(),
        }
    }
}
