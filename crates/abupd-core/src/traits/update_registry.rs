// # Update Registry Trait
//
// The registry owns update records and the fan-out of change notifications
// to observers (UI, other controllers). The orchestrator only reads and
// writes a record's status and install progress, always by identifier.
//
// Records can be removed by the registry at any time. Mutators report a
// vanished record as `Error::NotFound`, which callers treat as "stale,
// nothing to update" rather than a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application-level status of an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    #[default]
    Unknown,
    Starting,
    Downloading,
    Downloaded,
    Paused,
    PausedError,
    Deleted,
    Verifying,
    Verified,
    VerificationFailed,
    Installing,
    Installed,
    InstallationFailed,
    InstallationCancelled,
}

/// Snapshot of an update record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Update identifier
    pub id: String,
    /// Backing archive on disk
    pub file: PathBuf,
    /// Current status
    pub status: UpdateStatus,
    /// Install progress, 0-100
    pub install_progress: u8,
}

impl UpdateRecord {
    /// Create a record for a downloaded, verified archive
    pub fn new(id: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
            status: UpdateStatus::Verified,
            install_progress: 0,
        }
    }
}

/// Trait for update registry implementations
#[async_trait]
pub trait UpdateRegistry: Send + Sync {
    /// Look up a record by identifier
    async fn get_update(&self, id: &str) -> Option<UpdateRecord>;

    /// Set a record's status
    ///
    /// Returns `Error::NotFound` if the record no longer exists.
    async fn set_status(&self, id: &str, status: UpdateStatus) -> Result<(), crate::Error>;

    /// Set a record's install progress (0-100)
    ///
    /// Returns `Error::NotFound` if the record no longer exists.
    async fn set_install_progress(&self, id: &str, progress: u8) -> Result<(), crate::Error>;

    /// Tell observers the install progress of `id` changed
    async fn notify_install_progress(&self, id: &str);

    /// Tell observers the record `id` changed
    async fn notify_update_change(&self, id: &str);

    /// Delete the update and its backing file
    async fn delete_update(&self, id: &str) -> Result<(), crate::Error>;
}
