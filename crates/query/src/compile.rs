//! Compile descriptors into canonical requests.
//!
//! The canonical string is the cache key, so rendering is deterministic:
//! query parameters always come in the order `$top`, `$select`, `$filter`,
//! `$orderby`, `$expand`, field lists keep insertion order, and only the
//! free-text clauses are percent-encoded.

use std::fmt;

use derive_getters::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::RequestDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled request relative to the configured service root.
///
/// Two canonical requests are the same query exactly when their strings are
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
pub struct CanonicalRequest {
    method: Method,
    path: String,
    query: String,
}

impl CanonicalRequest {
    /// `path?query`, or just `path` when no parameter is present.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    /// Cache key of a read.
    pub fn key(&self) -> String {
        self.path_and_query()
    }

    /// Absolute URL under `base` (trailing slashes on `base` are ignored).
    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.path_and_query())
    }
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_and_query())
    }
}

/// Path and query-string builder for OData resources.
#[derive(Debug)]
pub struct UrlBuilder {
    parts: Vec<String>,
    query_params: Vec<(&'static str, String)>,
}

impl UrlBuilder {
    pub fn new(endpoint: &str) -> Self {
        Self {
            parts: vec![endpoint.to_string()],
            query_params: Vec::new(),
        }
    }

    /// Key segment: `incidents` becomes `incidents(<id>)`.
    pub fn record(mut self, id: &str) -> Self {
        if let Some(last) = self.parts.last_mut() {
            last.push_str(&format!("({})", id));
        }
        self
    }

    pub fn segment(mut self, segment: &str) -> Self {
        self.parts.push(segment.to_string());
        self
    }

    /// Add a parameter whose value is already URL-safe.
    pub fn query(mut self, key: &'static str, value: String) -> Self {
        self.query_params.push((key, value));
        self
    }

    /// Add a parameter with percent-encoding of the value.
    pub fn query_encoded(mut self, key: &'static str, value: &str) -> Self {
        self.query_params
            .push((key, urlencoding::encode(value).into_owned()));
        self
    }

    pub fn build(self, method: Method) -> CanonicalRequest {
        let query = self
            .query_params
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .join("&");

        CanonicalRequest {
            method,
            path: self.parts.join("/"),
            query,
        }
    }
}

fn render_expand((relation, fields): &(String, Vec<String>)) -> String {
    if fields.is_empty() {
        relation.clone()
    } else {
        format!("{}($select={})", relation, fields.iter().join(","))
    }
}

/// Render a read descriptor.
pub fn compile(descriptor: &RequestDescriptor) -> CanonicalRequest {
    let mut url = UrlBuilder::new(&descriptor.endpoint);

    if let Some(id) = &descriptor.id {
        url = url.record(id);
    }
    if let Some(child) = &descriptor.child {
        url = url.segment(child);
    }
    if let Some(property) = &descriptor.property {
        // raw values take no query options
        return url.segment(property).segment("$value").build(Method::Get);
    }

    if let Some(top) = descriptor.top {
        url = url.query("$top", top.to_string());
    }
    if !descriptor.select.is_empty() {
        url = url.query("$select", descriptor.select.iter().join(","));
    }
    if let Some(filter) = descriptor.filter.render() {
        url = url.query_encoded("$filter", &filter);
    }
    if let Some(order_by) = descriptor.order_by.render() {
        url = url.query_encoded("$orderby", &order_by);
    }
    if !descriptor.expand.is_empty() {
        url = url.query(
            "$expand",
            descriptor.expand.iter().map(render_expand).join(","),
        );
    }

    let request = url.build(Method::Get);
    tracing::trace!("compiled {}", request);
    request
}

/// `POST <endpoint>`
pub fn compile_insert(endpoint: &str) -> CanonicalRequest {
    UrlBuilder::new(endpoint).build(Method::Post)
}

/// `PATCH <endpoint>(<id>)`
pub fn compile_update(endpoint: &str, id: &str) -> CanonicalRequest {
    UrlBuilder::new(endpoint).record(id).build(Method::Patch)
}
