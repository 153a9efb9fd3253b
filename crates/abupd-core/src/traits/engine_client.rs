// # Engine Client Trait
//
// Defines the interface to the privileged, out-of-process service that
// applies update payloads.
//
// ## Protocol
//
// 1. `bind()` hands the client the sending end of the orchestrator's event
//    channel. Every status notification from the service is pushed into it.
// 2. `apply_payload()` schedules the work and returns immediately.
// 3. Progress and outcome arrive later as `EngineEvent`s, possibly from
//    another task or thread.
//
// ## Implementations
//
// - Unix socket: `abupd-engine-socket` crate
// - Test doubles: `tests/common`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::mpsc;

/// Sending end of the engine event channel
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Status vocabulary of the applying service
///
/// Codes not known to this build are kept as [`EngineStatus::Unknown`] so
/// they reach the reconciler as an explicit no-op instead of being lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    Idle,
    CheckingForUpdate,
    UpdateAvailable,
    Downloading,
    Verifying,
    Finalizing,
    UpdatedNeedReboot,
    ReportingErrorEvent,
    AttemptingRollback,
    Disabled,
    CleanupPreviousUpdate,
    Unknown(i32),
}

impl EngineStatus {
    /// Decode a wire status code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::CheckingForUpdate,
            2 => Self::UpdateAvailable,
            3 => Self::Downloading,
            4 => Self::Verifying,
            5 => Self::Finalizing,
            6 => Self::UpdatedNeedReboot,
            7 => Self::ReportingErrorEvent,
            8 => Self::AttemptingRollback,
            9 => Self::Disabled,
            11 => Self::CleanupPreviousUpdate,
            other => Self::Unknown(other),
        }
    }

    /// Wire status code
    pub fn code(&self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::CheckingForUpdate => 1,
            Self::UpdateAvailable => 2,
            Self::Downloading => 3,
            Self::Verifying => 4,
            Self::Finalizing => 5,
            Self::UpdatedNeedReboot => 6,
            Self::ReportingErrorEvent => 7,
            Self::AttemptingRollback => 8,
            Self::Disabled => 9,
            Self::CleanupPreviousUpdate => 11,
            Self::Unknown(code) => *code,
        }
    }
}

/// Notification delivered by the applying service
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Status change or progress report
    StatusUpdate {
        status: EngineStatus,
        /// Progress fraction in `0.0..=1.0`
        percent: f32,
    },

    /// The service finished applying a payload
    PayloadApplicationComplete { error_code: i32 },
}

impl EngineEvent {
    /// Convenience constructor for status updates
    pub fn status(status: EngineStatus, percent: f32) -> Self {
        Self::StatusUpdate { status, percent }
    }
}

/// Request to apply a payload embedded in an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// `file://` URL of the archive
    pub url: String,
    /// Byte offset of the payload within the archive
    pub offset: u64,
    /// Payload length; 0 means "up to end of file"
    pub size: u64,
    /// Ordered `key=value` header lines
    pub headers: Vec<String>,
}

impl ApplyRequest {
    /// Size sentinel meaning the payload extends to the end of the file
    pub const TO_END_OF_FILE: u64 = 0;

    /// Build a request for a payload that runs to the end of `archive`
    ///
    /// `archive` should be absolute; it is embedded verbatim in the URL.
    pub fn for_archive(archive: &Path, offset: u64, headers: Vec<String>) -> Self {
        Self {
            url: format!("file://{}", archive.display()),
            offset,
            size: Self::TO_END_OF_FILE,
            headers,
        }
    }
}

/// Trait for engine client implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Responsibilities
///
/// - ✅ Establish and keep the channel to the applying service
/// - ✅ Translate service notifications into [`EngineEvent`]s
/// - ❌ Interpret statuses (owned by the reconciler)
/// - ❌ Touch the install marker or update records (owned by the orchestrator)
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Establish the asynchronous channel to the applying service
    ///
    /// Binding again replaces any previous channel. All later notifications
    /// are sent to `events`.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Bound
    /// - `Err(Error::BindFailed)`: Service unavailable or access denied
    async fn bind(&self, events: EngineEventSender) -> Result<(), crate::Error>;

    /// Schedule application of a payload
    ///
    /// Returns as soon as the request is handed over; it does not wait for
    /// the service to make progress.
    async fn apply_payload(&self, request: &ApplyRequest) -> Result<(), crate::Error>;

    /// Get the client name (for logging)
    fn client_name(&self) -> &'static str;
}

/// Helper trait for constructing engine clients from configuration
pub trait EngineClientFactory: Send + Sync {
    /// Create an EngineClient instance from configuration
    fn create(
        &self,
        config: &crate::config::EngineClientConfig,
    ) -> Result<Box<dyn EngineClient>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_known_values() {
        for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11] {
            assert_eq!(EngineStatus::from_code(code).code(), code);
        }
        assert_eq!(EngineStatus::from_code(10), EngineStatus::Unknown(10));
        assert_eq!(EngineStatus::from_code(3), EngineStatus::Downloading);
    }

    #[test]
    fn test_apply_request_for_archive() {
        let request = ApplyRequest::for_archive(
            Path::new("/data/updates/update.zip"),
            1234,
            vec!["FILE_HASH=abc".to_string()],
        );
        assert_eq!(request.url, "file:///data/updates/update.zip");
        assert_eq!(request.offset, 1234);
        assert_eq!(request.size, ApplyRequest::TO_END_OF_FILE);
        assert_eq!(request.headers, vec!["FILE_HASH=abc"]);
    }
}
