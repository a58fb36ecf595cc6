//! Bodies for insert and update requests.

use std::marker::PhantomData;

use crmdesk_schema::{Entity, Field, Relation};
use serde_json::{Map, Value};

/// Changed fields of one `E` record, serialized as the JSON request body.
///
/// ```rust,ignore
/// let body = Changes::<Incident>::new()
///     .set(IncidentField::Title, "VPN drops every hour")
///     .bind(Incident::CUSTOMER, "a1b2")
///     .into_value();
/// // {"title": "...", "customerid_account@odata.bind": "/accounts(a1b2)"}
/// ```
pub struct Changes<E> {
    fields: Map<String, Value>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Changes<E> {
    pub fn new() -> Self {
        Self {
            fields: Map::new(),
            _entity: PhantomData,
        }
    }

    pub fn set(mut self, field: E::Field, value: impl Into<Value>) -> Self {
        self.fields.insert(field.name().to_string(), value.into());
        self
    }

    /// Set `field` to null.
    pub fn clear(mut self, field: E::Field) -> Self {
        self.fields.insert(field.name().to_string(), Value::Null);
        self
    }

    /// Point `relation` at the `To` record `id`.
    pub fn bind<To: Entity>(mut self, relation: Relation<E, To>, id: &str) -> Self {
        self.fields.insert(
            format!("{}@odata.bind", relation.name()),
            Value::String(relation.bind_path(id)),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl<E: Entity> Default for Changes<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> From<Changes<E>> for Value {
    fn from(changes: Changes<E>) -> Self {
        changes.into_value()
    }
}
