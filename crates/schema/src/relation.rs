//! Typed navigation properties between entities.
//!
//! A [`Relation`] is a single-valued navigation property (many-to-one or
//! one-to-one) that can be inlined with `$expand`. A [`Collection`] is a
//! one-to-many navigation property queried as a sub-resource of one record
//! (`incidents(<id>)/Incident_Emails`).

use std::{fmt, marker::PhantomData};

use crate::Entity;

/// Single-valued navigation property from `From` to `To`.
pub struct Relation<From, To> {
    name: &'static str,
    _marker: PhantomData<fn() -> (From, To)>,
}

/// One-to-many navigation property from `From` to `To`.
pub struct Collection<From, To> {
    name: &'static str,
    _marker: PhantomData<fn() -> (From, To)>,
}

impl<From, To> Relation<From, To> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Navigation property name (also the `@odata.bind` key prefix).
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<From, To: Entity> Relation<From, To> {
    pub fn target_endpoint(&self) -> &'static str {
        To::ENDPOINT
    }

    /// Value for `<name>@odata.bind` pointing at the record `id`.
    pub fn bind_path(&self, id: &str) -> String {
        format!("/{}({})", To::ENDPOINT, id)
    }
}

impl<From, To> Collection<From, To> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<From, To: Entity> Collection<From, To> {
    pub fn target_endpoint(&self) -> &'static str {
        To::ENDPOINT
    }
}

// Manual impls: deriving would put bounds on the phantom parameters.

impl<From, To> Clone for Relation<From, To> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<From, To> Copy for Relation<From, To> {}

impl<From, To> Clone for Collection<From, To> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<From, To> Copy for Collection<From, To> {}

impl<From: Entity, To: Entity> fmt::Debug for Relation<From, To> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relation({} -> {} via {})", From::ENDPOINT, To::ENDPOINT, self.name)
    }
}

impl<From: Entity, To: Entity> fmt::Debug for Collection<From, To> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Collection({} -> {} via {})", From::ENDPOINT, To::ENDPOINT, self.name)
    }
}
