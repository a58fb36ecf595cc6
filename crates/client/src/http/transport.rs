//! The seam between the query engine and the network.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use crmdesk_query::Method;
use reqwest::{header, Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::QueryResult;

/// One request as the engine hands it to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path and query relative to the service root, or an absolute URL
    /// (server-provided paging links).
    pub target: String,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            target: target.into(),
            body: None,
        }
    }

    pub fn with_body(method: Method, target: impl Into<String>, body: Value) -> Self {
        Self {
            method,
            target: target.into(),
            body: Some(body),
        }
    }

    /// `"GET incidents?$top=1"`
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.target)
    }
}

/// Status and body of a completed exchange. Any status is a completed
/// exchange; turning non-2xx into errors is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn execute(&self, request: &HttpRequest) -> QueryResult<HttpResponse>;
}

/// Transport talking to the CRM's OData endpoint over HTTPS.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> QueryResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn resolve(&self, target: &str) -> QueryResult<Url> {
        if let Ok(absolute) = Url::parse(target) {
            return Ok(absolute);
        }
        let joined = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), target);
        Ok(Url::parse(&joined)?)
    }

    fn request_for(&self, request: &HttpRequest) -> QueryResult<RequestBuilder> {
        let url = self.resolve(&request.target)?;

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0");

        // annotations are only requested on reads
        if request.method.is_read() {
            builder = builder.header("Prefer", "odata.include-annotations=\"*\"");
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(
        name = "crmdesk.http.execute",
        skip(self, request),
        fields(method = %request.method, target = %request.target),
        err
    )]
    async fn execute(&self, request: &HttpRequest) -> QueryResult<HttpResponse> {
        let res = self.request_for(request)?.send().await?;
        let status = res.status().as_u16();
        let body = res.text().await?;

        debug!("{} -> {}", request.route(), status);
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn transport() -> ReqwestTransport {
        let base = Url::parse("https://crm.example/api/data/v9.2/").unwrap();
        ReqwestTransport::new(base, Some("t0k".into()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_reads_ask_for_annotations() {
        let request = transport()
            .request_for(&HttpRequest::get("incidents?$top=1"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://crm.example/api/data/v9.2/incidents?$top=1"
        );
        assert_eq!(
            request.headers()["Prefer"],
            "odata.include-annotations=\"*\""
        );
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer t0k");
        assert_eq!(request.headers()["OData-Version"], "4.0");
    }

    #[test]
    fn test_mutations_skip_prefer_header() {
        let transport = transport();
        for method in [Method::Post, Method::Patch] {
            let request = transport
                .request_for(&HttpRequest::with_body(
                    method,
                    "templates",
                    json!({"title": "x"}),
                ))
                .unwrap()
                .build()
                .unwrap();

            assert!(request.headers().get("Prefer").is_none());
            assert_eq!(request.headers()[header::ACCEPT], "application/json");
        }
    }
}
