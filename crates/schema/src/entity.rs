use std::fmt::Debug;

/// A remote record type exposed by the CRM under an OData entity set.
///
/// Implementations are generated by [`entity!`](crate::entity) and carry no
/// runtime state.
pub trait Entity: Copy + Default + Send + Sync + 'static {
    /// One variant per remote attribute.
    type Field: Field;

    /// Entity set name used in request paths (e.g. `incidents`).
    const ENDPOINT: &'static str;

    /// Singular logical name (e.g. `incident`).
    const LOGICAL_NAME: &'static str;

    /// Primary key attribute.
    fn primary_key() -> Self::Field;

    fn endpoint() -> &'static str {
        Self::ENDPOINT
    }
}

/// A remote attribute name that has been checked at compile time.
pub trait Field: Copy + Debug + Eq + Send + Sync + 'static {
    /// Attribute name as the server spells it.
    fn name(&self) -> &'static str;

    /// Every attribute of the entity, in declaration order.
    fn all() -> &'static [Self];
}

/// Collect attribute names, keeping the caller's order.
pub fn field_names<F: Field>(fields: impl IntoIterator<Item = F>) -> Vec<&'static str> {
    fields.into_iter().map(|f| f.name()).collect()
}
