// # Memory Marker Store
//
// In-memory implementation of MarkerStore.
//
// ## Crash Behavior
//
// - The marker is lost on restart/crash
// - A relaunched orchestrator cannot reconnect to a running installation
//
// ## When to Use
//
// - Testing environments
// - Hosts that never restart the orchestrator during an install

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::MarkerStoreConfig;
use crate::traits::marker_store::{MarkerStore, MarkerStoreFactory};

/// In-memory marker store implementation
///
/// Clones share the same underlying map, which lets tests keep a handle on
/// a store after boxing it into an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MemoryMarkerStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryMarkerStore {
    /// Create a new empty memory marker store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for `MarkerStoreConfig::Memory`
#[derive(Debug, Default)]
pub struct MemoryMarkerStoreFactory;

#[async_trait]
impl MarkerStoreFactory for MemoryMarkerStoreFactory {
    async fn create(&self, _config: &MarkerStoreConfig) -> Result<Box<dyn MarkerStore>, Error> {
        Ok(Box::new(MemoryMarkerStore::new()))
    }
}
