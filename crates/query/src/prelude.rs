//! Common imports for building queries.

pub use crate::{
    Changes, DependencyTag, Direction, FilterMode, Query, RequestDescriptor, ResponseShape,
};
pub use crmdesk_schema::{Entity, Field};
