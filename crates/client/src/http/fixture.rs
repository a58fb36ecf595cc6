//! In-memory transport serving canned responses.
//!
//! Used by the test-suite and by `crmdesk --fixtures <dir>` to work against
//! recorded data without a CRM organisation.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::Mutex,
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use crmdesk_query::Method;
use serde_json::Value;
use tracing::{debug, trace};

use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::{QueryError, QueryResult};

/// A canned answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    status: u16,
    body: String,
    delay: Duration,
    unreachable: bool,
}

impl Fixture {
    /// `200` with `value` as the JSON body.
    pub fn json(value: Value) -> Self {
        Self::status(200, value.to_string())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: Duration::ZERO,
            unreachable: false,
        }
    }

    pub fn no_content() -> Self {
        Self::status(204, "")
    }

    /// The server cannot be reached at all.
    pub fn connection_failure() -> Self {
        Self {
            unreachable: true,
            ..Self::status(0, "")
        }
    }

    /// Answer only after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Routes {
    /// `"METHOD target"` -> answers in order; the last one repeats.
    exact: HashMap<String, VecDeque<Fixture>>,
    /// Entity set -> answer for any GET on it.
    endpoints: HashMap<String, Fixture>,
}

#[derive(Debug, Default)]
pub struct FixtureTransport {
    routes: Mutex<Routes>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<endpoint>.json` files from `dir` as answers for GETs on that
    /// endpoint.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let transport = Self::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read fixture directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(endpoint) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read fixture {}", path.display()))?;
            serde_json::from_str::<Value>(&body)
                .with_context(|| format!("fixture {} is not valid JSON", path.display()))?;

            debug!("loaded fixture for {} from {}", endpoint, path.display());
            transport.respond_endpoint(endpoint, Fixture::status(200, body));
        }
        Ok(transport)
    }

    /// Queue `fixture` for `method target`. Queued answers are served in
    /// order and the last one keeps being served.
    pub fn respond(&self, method: Method, target: &str, fixture: Fixture) -> &Self {
        self.lock_routes()
            .exact
            .entry(format!("{} {}", method, target))
            .or_default()
            .push_back(fixture);
        self
    }

    /// Serve `fixture` for any GET on `endpoint` without a more specific route.
    pub fn respond_endpoint(&self, endpoint: &str, fixture: Fixture) -> &Self {
        self.lock_routes()
            .endpoints
            .insert(endpoint.to_string(), fixture);
        self
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.lock_calls().clone()
    }

    pub fn call_count(&self, method: Method, target: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|c| c.method == method && c.target == target)
            .count()
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<HttpRequest>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn answer_for(&self, request: &HttpRequest) -> Option<Fixture> {
        let mut routes = self.lock_routes();

        if let Some(queue) = routes.exact.get_mut(&request.route()) {
            let fixture = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if fixture.is_some() {
                return fixture;
            }
        }

        if request.method.is_read() {
            return routes.endpoints.get(endpoint_of(&request.target)).cloned();
        }
        None
    }
}

/// `incidents(1)/Incident_Emails?$top=1` -> `incidents`
fn endpoint_of(target: &str) -> &str {
    let end = target.find(['(', '/', '?']).unwrap_or(target.len());
    &target[..end]
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn execute(&self, request: &HttpRequest) -> QueryResult<HttpResponse> {
        self.lock_calls().push(request.clone());
        trace!("fixture request {}", request.route());

        let Some(fixture) = self.answer_for(request) else {
            return Ok(HttpResponse {
                status: 404,
                body: format!("no fixture for {}", request.route()),
            });
        };

        if !fixture.delay.is_zero() {
            tokio::time::sleep(fixture.delay).await;
        }
        if fixture.unreachable {
            return Err(QueryError::Connection(format!(
                "fixture refused {}",
                request.route()
            )));
        }

        Ok(HttpResponse {
            status: fixture.status,
            body: fixture.body,
        })
    }
}
