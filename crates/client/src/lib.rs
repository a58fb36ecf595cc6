//! Cached, self-refreshing execution of CRM OData queries.
//!
//! A [`QueryClient`] compiles typed queries into canonical requests, serves
//! them from its [`CacheStore`] when a live entry exists and otherwise
//! fetches them with retry. Every cached query is exposed as a
//! [`SubscriptionValue`] that keeps receiving fresh values while someone
//! listens, and is dropped from the cache once nobody does.

mod cache;
mod config;
mod engine;
mod error;
pub mod http;
mod query_ext;
mod registry;
mod subscription;

pub mod prelude;

pub use cache::{CacheEntry, CacheStore, EntryState};
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use engine::{Page, QueryClient};
pub use error::{QueryError, QueryResult, RegistryError};
pub use query_ext::{QueryClientProvider, QueryExt};
pub use registry::{ServiceRegistry, ServiceRegistryBuilder, CACHE_STORE, QUERY_CLIENT};
pub use subscription::{ObserverHandle, Observable, Subscription, SubscriptionValue, TypedSubscription};

pub use crmdesk_query as query;
