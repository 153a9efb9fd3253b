//! Plugin-based component registry
//!
//! The registry lets engine clients and marker stores be registered by type
//! name at runtime, so the daemon builds them from configuration without
//! hardcoded if-else chains.
//!
//! ## Registration
//!
//! Plugin crates expose a `register()` function:
//!
//! ```rust,ignore
//! // In abupd-engine-socket
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_engine_client("socket", Box::new(SocketEngineClientFactory));
//! }
//! ```

use crate::config::{EngineClientConfig, MarkerStoreConfig};
use crate::error::{Error, Result};
use crate::marker::{FileMarkerStoreFactory, MemoryMarkerStoreFactory};
use crate::traits::{EngineClient, EngineClientFactory, MarkerStore, MarkerStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of component factories
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    engine_clients: RwLock<HashMap<String, Box<dyn EngineClientFactory>>>,
    marker_stores: RwLock<HashMap<String, Arc<dyn MarkerStoreFactory>>>,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `file` and `memory` marker stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_marker_store("file", Box::new(FileMarkerStoreFactory));
        registry.register_marker_store("memory", Box::new(MemoryMarkerStoreFactory));
        registry
    }

    /// Register an engine client factory under `name`
    pub fn register_engine_client(
        &self,
        name: impl Into<String>,
        factory: Box<dyn EngineClientFactory>,
    ) {
        let mut clients = self
            .engine_clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clients.insert(name.into(), factory);
    }

    /// Register a marker store factory under `name`
    pub fn register_marker_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn MarkerStoreFactory>,
    ) {
        let mut stores = self
            .marker_stores
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Create an engine client from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn EngineClient>)`: Created client
    /// - `Err(Error)`: If the client type is not registered or creation fails
    pub fn create_engine_client(&self, config: &EngineClientConfig) -> Result<Box<dyn EngineClient>> {
        let client_type = config.type_name();
        let clients = self
            .engine_clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let factory = clients
            .get(client_type)
            .ok_or_else(|| Error::config(format!("Unknown engine client type: {}", client_type)))?;

        factory.create(config)
    }

    /// Create a marker store from configuration
    pub async fn create_marker_store(
        &self,
        config: &MarkerStoreConfig,
    ) -> Result<Box<dyn MarkerStore>> {
        let store_type = config.type_name();
        let factory = {
            let stores = self
                .marker_stores
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            stores
                .get(store_type)
                .ok_or_else(|| Error::config(format!("Unknown marker store type: {}", store_type)))?
                .clone()
        };

        // Lock released before the async create
        factory.create(config).await
    }

    /// List all registered engine client types
    pub fn list_engine_clients(&self) -> Vec<String> {
        let clients = self
            .engine_clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clients.keys().cloned().collect()
    }

    /// Check if an engine client type is registered
    pub fn has_engine_client(&self, name: &str) -> bool {
        let clients = self
            .engine_clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clients.contains_key(name)
    }

    /// Check if a marker store type is registered
    pub fn has_marker_store(&self, name: &str) -> bool {
        let stores = self
            .marker_stores
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stores.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingClientFactory;

    impl EngineClientFactory for FailingClientFactory {
        fn create(&self, _config: &EngineClientConfig) -> Result<Box<dyn EngineClient>> {
            Err(Error::config("Mock engine client not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ComponentRegistry::new();
        assert!(!registry.has_engine_client("mock"));

        registry.register_engine_client("mock", Box::new(FailingClientFactory));

        assert!(registry.has_engine_client("mock"));
        assert!(registry.list_engine_clients().contains(&"mock".to_string()));
    }

    #[test]
    fn test_unknown_engine_client_type() {
        let registry = ComponentRegistry::new();
        let result = registry.create_engine_client(&EngineClientConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_builtin_marker_stores() {
        let registry = ComponentRegistry::with_builtin_stores();
        assert!(registry.has_marker_store("file"));
        assert!(registry.has_marker_store("memory"));

        let store = registry
            .create_marker_store(&MarkerStoreConfig::Memory)
            .await
            .unwrap();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
