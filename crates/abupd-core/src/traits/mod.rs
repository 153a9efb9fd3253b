//! Core traits for the A/B update orchestrator
//!
//! This module defines the abstract interfaces at the orchestrator's seams.
//!
//! - [`EngineClient`]: Talk to the privileged applying service
//! - [`MarkerStore`]: Durable storage for the install marker
//! - [`UpdateRegistry`]: Update records and observer notifications

pub mod engine_client;
pub mod marker_store;
pub mod update_registry;

pub use engine_client::{
    ApplyRequest, EngineClient, EngineClientFactory, EngineEvent, EngineEventSender, EngineStatus,
};
pub use marker_store::{MarkerStore, MarkerStoreFactory};
pub use update_registry::{UpdateRecord, UpdateRegistry, UpdateStatus};
