//! Error types for the A/B update orchestrator
//!
//! This module defines all error types used throughout the crate.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the A/B update orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// The update archive could not be turned into a payload descriptor
    #[error("Could not prepare {}: {reason}", path.display())]
    LocateFailed {
        /// Archive that was inspected
        path: PathBuf,
        /// Flattened cause chain
        reason: String,
    },

    /// No channel to the applying service could be established
    #[error("Could not bind engine client ({client}): {reason}")]
    BindFailed {
        /// Engine client name
        client: String,
        /// Error message
        reason: String,
    },

    /// An installation is already in progress
    #[error("Already installing update {0}")]
    AlreadyInstalling(String),

    /// The update's backing file does not exist
    #[error("Update file does not exist: {}", .0.display())]
    FileMissing(PathBuf),

    /// No installation marker is present
    #[error("Not installing any update")]
    NotInstalling,

    /// Update record not found
    #[error("Update not found: {0}")]
    NotFound(String),

    /// The apply request could not be delivered to the applying service
    #[error("Engine client error: {0}")]
    EngineClient(String),

    /// Marker store-related errors
    #[error("Marker store error: {0}")]
    MarkerStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a locate failure for the given archive
    pub fn locate_failed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::LocateFailed {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a bind failure
    pub fn bind_failed(client: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            client: client.into(),
            reason: reason.into(),
        }
    }

    /// Create an engine client error
    pub fn engine_client(msg: impl Into<String>) -> Self {
        Self::EngineClient(msg.into())
    }

    /// Create a marker store error
    pub fn marker_store(msg: impl Into<String>) -> Self {
        Self::MarkerStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether this error means the update record is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
