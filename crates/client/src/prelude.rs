//! Common imports for running queries.

pub use crate::{
    ClientConfig, Observable, QueryClient, QueryError, QueryExt, QueryResult, ServiceRegistry,
    SubscriptionValue,
};
pub use crmdesk_query::prelude::*;
