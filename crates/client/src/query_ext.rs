//! Execution methods on typed queries.
//!
//! ```rust,ignore
//! let tickets = client
//!     .query::<Incident>()
//!     .select([IncidentField::Title, IncidentField::StatusCode])
//!     .filter("statuscode eq 1")
//!     .observe::<Vec<Ticket>>(None)?;
//!
//! let mut updates = tickets.subscribe();
//! while let Some(list) = updates.next().await {
//!     render(list?);
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use crmdesk_query::{Changes, DependencyTag, Query};
use crmdesk_schema::Entity;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Observable, QueryClient, QueryResult, SubscriptionValue};

/// Anything that can hand out the [`QueryClient`] a query runs on.
pub trait QueryClientProvider {
    fn query_client(&self) -> &QueryClient;
}

impl QueryClientProvider for QueryClient {
    fn query_client(&self) -> &QueryClient {
        self
    }
}

impl QueryClientProvider for &QueryClient {
    fn query_client(&self) -> &QueryClient {
        self
    }
}

impl QueryClientProvider for Arc<QueryClient> {
    fn query_client(&self) -> &QueryClient {
        self.as_ref()
    }
}

#[async_trait]
pub trait QueryExt<E: Entity> {
    /// Cached, self-refreshing value of this query.
    fn observe_raw(&self, previous: Option<Value>) -> QueryResult<SubscriptionValue<Value>>;

    /// [`observe_raw`](Self::observe_raw) read as `T`.
    fn observe<T: DeserializeOwned>(&self, previous: Option<Value>) -> QueryResult<Observable<T>>;

    /// One uncached read.
    async fn fetch<T: DeserializeOwned + Send>(&self) -> QueryResult<T>;

    /// Create an `E` record.
    async fn insert(&self, changes: Changes<E>) -> QueryResult<Option<Value>>;

    /// Change fields of the `E` record `id`.
    async fn update(&self, id: &str, changes: Changes<E>) -> QueryResult<Option<Value>>;

    /// Refresh every cached query that depends on `E`.
    fn invalidate_entity(&self) -> QueryResult<usize>;
}

#[async_trait]
impl<E, C> QueryExt<E> for Query<E, C>
where
    E: Entity,
    C: QueryClientProvider + Send + Sync,
{
    fn observe_raw(&self, previous: Option<Value>) -> QueryResult<SubscriptionValue<Value>> {
        self.client().query_client().get(self.descriptor(), previous)
    }

    fn observe<T: DeserializeOwned>(&self, previous: Option<Value>) -> QueryResult<Observable<T>> {
        self.observe_raw(previous).map(Observable::new)
    }

    async fn fetch<T: DeserializeOwned + Send>(&self) -> QueryResult<T> {
        let value = self
            .client()
            .query_client()
            .fetch_once(self.descriptor())
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn insert(&self, changes: Changes<E>) -> QueryResult<Option<Value>> {
        self.client()
            .query_client()
            .insert(E::ENDPOINT, changes.into_value())
            .await
    }

    async fn update(&self, id: &str, changes: Changes<E>) -> QueryResult<Option<Value>> {
        self.client()
            .query_client()
            .update(E::ENDPOINT, id, changes.into_value())
            .await
    }

    fn invalidate_entity(&self) -> QueryResult<usize> {
        self.client()
            .query_client()
            .invalidate(DependencyTag::entity::<E>())
    }
}
