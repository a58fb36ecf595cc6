//! Explicit service registry.
//!
//! Services are registered once while building, then the registry is frozen
//! and handed to whoever needs to resolve them.

use std::{
    any::{type_name, Any},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use tracing::debug;

use crate::{CacheStore, ClientConfig, QueryClient, RegistryError};

/// Well-known id of the [`QueryClient`].
pub const QUERY_CLIENT: &str = "crmdesk.query_client";
/// Well-known id of the client's [`CacheStore`].
pub const CACHE_STORE: &str = "crmdesk.cache_store";

type Service = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ServiceRegistryBuilder {
    services: HashMap<String, Service>,
}

impl ServiceRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(
        mut self,
        id: &str,
        service: Arc<T>,
    ) -> Result<Self, RegistryError> {
        if self.services.contains_key(id) {
            return Err(RegistryError::Duplicate(id.to_string()));
        }
        debug!("registering service {} ({})", id, type_name::<T>());
        self.services.insert(id.to_string(), service);
        Ok(self)
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            services: Arc::new(self.services),
        }
    }
}

/// Frozen id -> service map. Clones share the same services.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<HashMap<String, Service>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.ids())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::new()
    }

    /// Registry with a client built from `config` and its cache store.
    pub fn bootstrap(config: ClientConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(QueryClient::new(config)?)?)
    }

    /// Registry exposing `client` and its cache store.
    pub fn with_client(client: QueryClient) -> Result<Self, RegistryError> {
        let store = client.store().clone();
        Ok(Self::builder()
            .register(QUERY_CLIENT, Arc::new(client))?
            .register(CACHE_STORE, store)?
            .build())
    }

    pub fn resolve<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>, RegistryError> {
        let service = self
            .services
            .get(id)
            .ok_or_else(|| RegistryError::Missing(id.to_string()))?;
        service
            .clone()
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                id: id.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn query_client(&self) -> Result<Arc<QueryClient>, RegistryError> {
        self.resolve(QUERY_CLIENT)
    }

    pub fn cache_store(&self) -> Result<Arc<CacheStore>, RegistryError> {
        self.resolve(CACHE_STORE)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.services.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FixtureTransport;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_duplicate_registration_fails() {
        let err = ServiceRegistry::builder()
            .register("greeting", Arc::new("hello".to_string()))
            .and_then(|b| b.register("greeting", Arc::new(1u32)))
            .err();
        assert_eq!(err, Some(RegistryError::Duplicate("greeting".into())));
    }

    #[test]
    fn test_resolve_missing_and_wrong_type() -> anyhow::Result<()> {
        let registry = ServiceRegistry::builder()
            .register("answer", Arc::new(42u32))?
            .build();

        assert_eq!(*registry.resolve::<u32>("answer")?, 42);
        assert_eq!(
            registry.resolve::<u32>("question").unwrap_err(),
            RegistryError::Missing("question".into())
        );
        assert!(matches!(
            registry.resolve::<String>("answer"),
            Err(RegistryError::TypeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_with_client_shares_store() -> anyhow::Result<()> {
        let client = QueryClient::with_transport(
            ClientConfig::default(),
            Arc::new(FixtureTransport::new()),
        );
        let registry = ServiceRegistry::with_client(client)?;

        assert_eq!(registry.ids(), vec![CACHE_STORE, QUERY_CLIENT]);
        let resolved = registry.query_client()?;
        assert!(Arc::ptr_eq(resolved.store(), &registry.cache_store()?));
        Ok(())
    }
}
