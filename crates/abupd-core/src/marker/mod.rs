// # Install Marker
//
// The durable, single-slot record of which installation is in progress.
//
// The marker is a best-effort signal: it is written after an install has
// been handed to the applying service and cleared on any terminal outcome.
// After a restart it only says "an install may still be running"; the
// engine's first status notification decides what is actually true.

pub mod file;
pub mod memory;

pub use file::{FileMarkerStore, FileMarkerStoreFactory};
pub use memory::{MemoryMarkerStore, MemoryMarkerStoreFactory};

use crate::Result;
use crate::traits::MarkerStore;

/// Single-slot view over one entry of a [`MarkerStore`]
///
/// The orchestrator keeps this behind its session lock; nothing else
/// should write the entry.
pub struct InstallMarker {
    store: Box<dyn MarkerStore>,
    key: String,
}

impl InstallMarker {
    /// Wrap `store`, using the entry named `key`
    pub fn new(store: Box<dyn MarkerStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Identifier of the installation believed to be in progress
    ///
    /// An empty stored value counts as absent.
    pub async fn current(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&self.key)
            .await?
            .filter(|id| !id.is_empty()))
    }

    /// Whether any installation is marked as in progress
    pub async fn is_installing(&self) -> Result<bool> {
        Ok(self.current().await?.is_some())
    }

    /// Whether `id` is the installation marked as in progress
    pub async fn is_installing_update(&self, id: &str) -> Result<bool> {
        Ok(self.current().await?.as_deref() == Some(id))
    }

    /// Durably mark `id` as in progress
    pub async fn write(&self, id: &str) -> Result<()> {
        self.store.set(&self.key, id).await
    }

    /// Durably clear the marker
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(&self.key).await
    }

    /// Persist any pending store changes
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    /// Name of the marker entry
    pub fn key(&self) -> &str {
        &self.key
    }
}
