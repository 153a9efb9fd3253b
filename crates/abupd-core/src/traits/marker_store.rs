// # Marker Store Trait
//
// Defines the interface for the durable key-value store that holds the
// install marker.
//
// ## Purpose
//
// The orchestrator must remember which installation was in flight when the
// process is killed and relaunched. Only one named entry is used for that;
// the store itself is a plain string key-value map so it can be shared with
// other small settings.
//
// ## Implementations
//
// - File-based: JSON file with atomic writes and backup recovery
// - Memory: for tests and ephemeral runs

use async_trait::async_trait;

/// Trait for marker store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Implementation Guidelines
///
/// - **Durable writes**: `set()` and `remove()` must be persisted before returning
/// - **Async I/O only**: never block the runtime
/// - **No business logic**: deciding when the marker is written or cleared is
///   owned by the orchestrator
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Get the value stored under `key`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))`: Entry present
    /// - `Ok(None)`: No entry
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error>;

    /// Create or replace the entry under `key`
    async fn set(&self, key: &str, value: &str) -> Result<(), crate::Error>;

    /// Remove the entry under `key` (no error if absent)
    async fn remove(&self, key: &str) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing marker stores from configuration
#[async_trait]
pub trait MarkerStoreFactory: Send + Sync {
    /// Create a MarkerStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::MarkerStoreConfig,
    ) -> Result<Box<dyn MarkerStore>, crate::Error>;
}
