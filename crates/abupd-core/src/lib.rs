// # abupd-core
//
// Core library for installing A/B (seamless) updates through an external,
// privileged applying service.
//
// ## Architecture Overview
//
// - **PayloadLocator**: Finds the stored payload and its header properties in an update archive
// - **InstallMarker**: Durable single-slot record of the installation in progress
// - **EngineClient**: Trait for the bind/apply/notify protocol of the applying service
// - **StatusReconciler**: Pure mapping of engine statuses onto update status transitions
// - **InstallOrchestrator**: Starts installs, reconnects after restarts, applies notifications
// - **UpdateRegistry**: Trait for the external owner of update records
// - **ComponentRegistry**: Plugin-based registry for engine clients and marker stores
//
// ## Design Principles
//
// 1. **At most one install**: the marker and session are guarded by a single lock
// 2. **Event-Driven**: engine notifications arrive on a channel, never by blocking
// 3. **Crash-safe**: only the marker is persisted; the engine's first notification
//    after a reconnect is authoritative
// 4. **Library-First**: the daemon is a thin layer over this crate

pub mod config;
pub mod error;
pub mod installer;
pub mod marker;
pub mod payload;
pub mod reconciler;
pub mod registry;
pub mod traits;
pub mod updates;

// Re-export core types for convenience
pub use config::{ArchiveConfig, EngineClientConfig, InstallerConfig, MarkerStoreConfig, UpdaterConfig};
pub use error::{Error, Result};
pub use installer::{InstallOrchestrator, InstallerEvent};
pub use marker::{FileMarkerStore, InstallMarker, MemoryMarkerStore};
pub use payload::{PayloadDescriptor, PayloadLocator};
pub use reconciler::{SessionState, Transition};
pub use registry::ComponentRegistry;
pub use traits::{EngineClient, EngineEvent, EngineStatus, MarkerStore, UpdateRegistry, UpdateStatus};
pub use updates::{MemoryUpdateRegistry, UpdateNotification};
