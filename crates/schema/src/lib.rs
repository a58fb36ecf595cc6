//! Compile-time descriptions of the CRM resources the workspace reads and writes.
//!
//! Every remote record type is a zero-sized marker implementing [`Entity`].
//! Field names live in a per-entity enum and relations are typed constants,
//! so a misspelled attribute or a relation pointing at the wrong entity is a
//! compile error rather than a 400 from the server.
//!
//! ```rust,ignore
//! use crmdesk_schema::{crm::*, Entity, Field};
//!
//! assert_eq!(Incident::ENDPOINT, "incidents");
//! assert_eq!(IncidentField::Title.name(), "title");
//! assert_eq!(Incident::CUSTOMER.target_endpoint(), "accounts");
//! ```

mod entity;
#[macro_use]
mod macros;
mod relation;

pub mod crm;

pub use {entity::*, relation::*};
