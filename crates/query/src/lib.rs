//! Request descriptors for the CRM's OData API and the compiler that turns
//! them into canonical, cache-keyable requests.
//!
//! Building a query is pure: nothing here touches the network. The client
//! crate executes [`Query`] values and caches them by
//! [`CanonicalRequest::key`].

mod builder;
mod changes;
mod compile;
mod descriptor;
mod filter;

pub mod prelude;

pub use builder::Query;
pub use changes::Changes;
pub use compile::{compile, compile_insert, compile_update, CanonicalRequest, Method, UrlBuilder};
pub use descriptor::{CachePolicy, CachePredicate, DependencyTag, RequestDescriptor, ResponseShape};
pub use filter::{Direction, FilterExpr, FilterMode, OrderBy};

pub use crmdesk_schema as schema;
