//! Typed fluent builder over [`RequestDescriptor`].
//!
//! ```rust,ignore
//! use crmdesk_query::prelude::*;
//! use crmdesk_schema::crm::*;
//!
//! let open_tickets = Query::<Incident>::new()
//!     .select([IncidentField::Title, IncidentField::TicketNumber])
//!     .filter("statuscode eq 1")
//!     .order_by(IncidentField::ModifiedOn, Direction::Desc)
//!     .top(100)
//!     .expand(Incident::CUSTOMER, [AccountField::Name]);
//!
//! assert_eq!(
//!     open_tickets.compile().key(),
//!     "incidents?$top=100&$select=title,ticketnumber&$filter=statuscode%20eq%201\
//!      &$orderby=modifiedon%20desc&$expand=customerid_account($select=name)"
//! );
//! ```

use std::{marker::PhantomData, time::Duration};

use crmdesk_schema::{Collection, Entity, Field, Relation};
use serde_json::Value;

use crate::{
    compile, CanonicalRequest, DependencyTag, Direction, FilterMode, RequestDescriptor,
};

/// A read query against entity `E`.
///
/// `C` is whatever executes the query. The query crate never looks at it;
/// it is carried through the chain so that execution methods can be added
/// by the crate that owns the client.
pub struct Query<E, C = ()> {
    descriptor: RequestDescriptor,
    client: C,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Query<E, ()> {
    pub fn new() -> Self {
        Self {
            descriptor: RequestDescriptor::new(E::ENDPOINT),
            client: (),
            _entity: PhantomData,
        }
    }

    /// Query the `collection` of the parent record `parent_id`.
    pub fn children_of<From: Entity>(parent_id: impl Into<String>, collection: Collection<From, E>) -> Self {
        Self {
            descriptor: RequestDescriptor::new(From::ENDPOINT)
                .with_id(parent_id)
                .with_child(collection.name())
                .expand_target(E::ENDPOINT),
            client: (),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for Query<E, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C: Clone> Clone for Query<E, C> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            client: self.client.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, C> std::fmt::Debug for Query<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("entity", &E::LOGICAL_NAME)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<E: Entity, C> Query<E, C> {
    /// Execute through `client` instead.
    pub fn with_client<C2>(self, client: C2) -> Query<E, C2> {
        Query {
            descriptor: self.descriptor,
            client,
            _entity: PhantomData,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn into_descriptor(self) -> RequestDescriptor {
        self.descriptor
    }

    pub fn into_parts(self) -> (RequestDescriptor, C) {
        (self.descriptor, self.client)
    }

    fn map(mut self, f: impl FnOnce(RequestDescriptor) -> RequestDescriptor) -> Self {
        self.descriptor = f(self.descriptor);
        self
    }

    /// Add fields to `$select`. Nothing selected means every field.
    pub fn select(self, fields: impl IntoIterator<Item = E::Field>) -> Self {
        self.map(|d| d.select(fields.into_iter().map(|f| f.name())))
    }

    /// AND `clause` onto the filter.
    pub fn filter(self, clause: impl Into<String>) -> Self {
        self.filter_with(FilterMode::And, clause)
    }

    /// OR `clause` with everything filtered so far.
    pub fn or_filter(self, clause: impl Into<String>) -> Self {
        self.filter_with(FilterMode::Or, clause)
    }

    /// Replace the whole filter with `clause` (search overrides).
    pub fn replace_filter(self, clause: impl Into<String>) -> Self {
        self.filter_with(FilterMode::Replace, clause)
    }

    /// Append `text` verbatim to the last filter clause.
    pub fn append_raw_filter(self, text: impl Into<String>) -> Self {
        self.filter_with(FilterMode::Concat, text)
    }

    pub fn filter_with(self, mode: FilterMode, clause: impl Into<String>) -> Self {
        self.map(|d| d.filter(mode, clause))
    }

    pub fn order_by(self, field: E::Field, direction: Direction) -> Self {
        self.map(|d| d.order_by(field.name(), direction))
    }

    pub fn order_by_raw(self, clause: impl Into<String>) -> Self {
        self.map(|d| d.order_by_raw(clause))
    }

    pub fn top(self, top: u32) -> Self {
        self.map(|d| d.top(top))
    }

    /// Inline `relation` selecting `fields` of the related entity.
    pub fn expand<To: Entity>(
        self,
        relation: Relation<E, To>,
        fields: impl IntoIterator<Item = To::Field>,
    ) -> Self {
        self.map(|d| {
            d.expand(relation.name(), fields.into_iter().map(|f| f.name()))
                .expand_target(To::ENDPOINT)
        })
    }

    /// Inline a one-to-many `collection` selecting `fields` of its members.
    pub fn expand_many<To: Entity>(
        self,
        collection: Collection<E, To>,
        fields: impl IntoIterator<Item = To::Field>,
    ) -> Self {
        self.map(|d| {
            d.expand(collection.name(), fields.into_iter().map(|f| f.name()))
                .expand_target(To::ENDPOINT)
        })
    }

    /// Address one record by primary key.
    pub fn id(self, id: impl Into<String>) -> Self {
        self.map(|d| d.with_id(id))
    }

    /// Address the raw value of `field` on the record selected with [`id`](Self::id).
    pub fn value_of(self, field: E::Field) -> Self {
        self.map(|d| d.with_property_value(field.name()))
    }

    /// Override the configured background refresh interval.
    pub fn refresh_every(self, interval: Duration) -> Self {
        self.map(|d| d.refresh_every(interval))
    }

    /// Only keep fetched values in the cache when `predicate` holds.
    pub fn cache_when<F>(self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.map(|d| d.cache_when(predicate))
    }

    pub fn depends_on(self, tag: impl Into<DependencyTag>) -> Self {
        self.map(|d| d.depends_on(tag))
    }

    pub fn compile(&self) -> CanonicalRequest {
        compile(&self.descriptor)
    }
}
