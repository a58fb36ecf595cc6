//! Untyped request descriptor.
//!
//! This is the representation the compiler and the cache work with. Typed
//! code builds it through [`Query`](crate::Query); tools that only know
//! endpoint names at runtime (the CLI) build it directly.

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::{Direction, FilterExpr, FilterMode, OrderBy};

/// How the response body of a read is turned into the cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    /// Envelope with a `value` array; the array is cached.
    List,
    /// One record, returned unwrapped.
    Single,
    /// Raw property value (`.../<property>/$value`), cached as a string.
    Raw,
}

/// Label naming an upstream entity set or child collection a cached value
/// was derived from. Invalidating a tag refreshes every entry carrying it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyTag(String);

impl DependencyTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Tag of an entity set.
    pub fn entity<E: crmdesk_schema::Entity>() -> Self {
        Self::new(E::ENDPOINT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DependencyTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for DependencyTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// Predicate deciding whether a fetched value may stay in the cache.
pub type CachePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Execution hints that travel with a descriptor but are not part of its
/// canonical form.
#[derive(Clone, Default)]
pub struct CachePolicy {
    /// Overrides the configured refresh interval. `Duration::ZERO` disables
    /// background refresh.
    pub refresh: Option<Duration>,
    pub cacheable: Option<CachePredicate>,
    pub extra_tags: BTreeSet<DependencyTag>,
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("refresh", &self.refresh)
            .field("cacheable", &self.cacheable.as_ref().map(|_| "<predicate>"))
            .field("extra_tags", &self.extra_tags)
            .finish()
    }
}

/// One logical read query.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub(crate) endpoint: String,
    pub(crate) id: Option<String>,
    pub(crate) child: Option<String>,
    pub(crate) property: Option<String>,
    pub(crate) select: Vec<String>,
    pub(crate) filter: FilterExpr,
    pub(crate) order_by: OrderBy,
    pub(crate) top: Option<u32>,
    pub(crate) expand: Vec<(String, Vec<String>)>,
    /// Target endpoints of expanded relations, used for dependency tags.
    pub(crate) expand_targets: BTreeSet<String>,
    pub(crate) policy: CachePolicy,
}

impl RequestDescriptor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            id: None,
            child: None,
            property: None,
            select: Vec::new(),
            filter: FilterExpr::default(),
            order_by: OrderBy::default(),
            top: None,
            expand: Vec::new(),
            expand_targets: BTreeSet::new(),
            policy: CachePolicy::default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn record_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn child_collection(&self) -> Option<&str> {
        self.child.as_deref()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Address a single record by primary key.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Address a one-to-many navigation property of the addressed record.
    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.child = Some(child.into());
        self
    }

    /// Address the raw value of one property of the addressed record.
    pub fn with_property_value(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Add fields to `$select`. Already selected fields are skipped.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.select.contains(&field) {
                self.select.push(field);
            }
        }
        self
    }

    pub fn filter(mut self, mode: FilterMode, clause: impl Into<String>) -> Self {
        self.filter.push(mode, clause);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(field, direction);
        self
    }

    pub fn order_by_raw(mut self, clause: impl Into<String>) -> Self {
        self.order_by.push_raw(clause);
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    /// Register the sub-select for `relation`. A second call for the same
    /// relation replaces only that relation's field list and keeps its
    /// position.
    pub fn expand<I, S>(mut self, relation: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let relation = relation.into();
        let mut selected: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if !selected.contains(&field) {
                selected.push(field);
            }
        }

        match self.expand.iter_mut().find(|(name, _)| *name == relation) {
            Some((_, existing)) => *existing = selected,
            None => self.expand.push((relation, selected)),
        }
        self
    }

    pub(crate) fn expand_target(mut self, endpoint: &str) -> Self {
        self.expand_targets.insert(endpoint.to_string());
        self
    }

    pub fn refresh_every(mut self, interval: std::time::Duration) -> Self {
        self.policy.refresh = Some(interval);
        self
    }

    pub fn cache_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.policy.cacheable = Some(Arc::new(predicate));
        self
    }

    pub fn depends_on(mut self, tag: impl Into<DependencyTag>) -> Self {
        self.policy.extra_tags.insert(tag.into());
        self
    }

    pub fn shape(&self) -> ResponseShape {
        match (&self.id, &self.child, &self.property) {
            (Some(_), _, Some(_)) => ResponseShape::Raw,
            (Some(_), None, None) => ResponseShape::Single,
            _ => ResponseShape::List,
        }
    }

    /// Endpoint, child collection, expanded targets and any explicit tags.
    pub fn dependency_tags(&self) -> BTreeSet<DependencyTag> {
        let mut tags = BTreeSet::new();
        tags.insert(DependencyTag::new(self.endpoint.clone()));
        if let Some(child) = &self.child {
            tags.insert(DependencyTag::new(child.clone()));
        }
        for target in &self.expand_targets {
            tags.insert(DependencyTag::new(target.clone()));
        }
        tags.extend(self.policy.extra_tags.iter().cloned());
        tags
    }

    /// Name used to look up the default cache duration: the child
    /// collection when present, the endpoint otherwise.
    pub fn cache_table_key(&self) -> &str {
        self.child.as_deref().unwrap_or(&self.endpoint)
    }
}
