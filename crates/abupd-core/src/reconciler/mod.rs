//! Status reconciliation
//!
//! Maps notifications from the applying service onto the application's
//! update status model. [`reconcile`] is a pure function of the session
//! state and one incoming status; the orchestrator applies the resulting
//! [`Transition`] to the update registry and the install marker.
//!
//! | incoming status | transition |
//! |---|---|
//! | `Downloading` / `Finalizing` | [`Transition::Progress`] |
//! | `ReportingErrorEvent` | [`Transition::Failed`] |
//! | `UpdatedNeedReboot` | [`Transition::Installed`] |
//! | `Idle` while reconnecting | [`Transition::StaleMarker`] |
//! | anything else | [`Transition::Ignore`] |
//!
//! A session whose update record has disappeared only ever yields
//! [`Transition::RecordMissing`].

use crate::traits::EngineStatus;

/// In-memory state of the current installation session
///
/// Not persisted; only the install marker survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Identifier of the installation this process is tracking
    pub active_id: Option<String>,
    /// Set between a post-restart rebind and the first status notification
    pub reconnecting: bool,
}

impl SessionState {
    /// Start tracking a fresh installation
    pub fn installing(id: impl Into<String>) -> Self {
        Self {
            active_id: Some(id.into()),
            reconnecting: false,
        }
    }

    /// Start tracking an installation recovered from the marker
    pub fn reconnecting(id: impl Into<String>) -> Self {
        Self {
            active_id: Some(id.into()),
            reconnecting: true,
        }
    }

    /// Stop tracking
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What the orchestrator must do in response to one status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing observable happened
    Ignore,
    /// Record the install progress (0-100)
    Progress(u8),
    /// Terminal failure: clear the marker, mark the update failed
    Failed,
    /// Terminal success: clear the marker, mark the update installed
    Installed,
    /// The marker claimed an install the service does not know about
    StaleMarker,
    /// The update record is gone; only the marker is cleaned up
    RecordMissing,
}

impl Transition {
    /// Whether this transition ends the session and clears the marker
    pub fn clears_marker(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Installed | Self::StaleMarker | Self::RecordMissing
        )
    }
}

/// Decide the transition for `status` given the session and whether the
/// session's update record still exists
pub fn reconcile(
    session: &SessionState,
    record_present: bool,
    status: EngineStatus,
    percent: f32,
) -> Transition {
    if session.active_id.is_none() {
        return Transition::Ignore;
    }
    if !record_present {
        return Transition::RecordMissing;
    }

    match status {
        EngineStatus::Downloading | EngineStatus::Finalizing => {
            Transition::Progress(progress_percent(percent))
        }
        EngineStatus::ReportingErrorEvent => Transition::Failed,
        EngineStatus::UpdatedNeedReboot => Transition::Installed,
        EngineStatus::Idle if session.reconnecting => Transition::StaleMarker,
        EngineStatus::Idle => Transition::Ignore,
        EngineStatus::CheckingForUpdate
        | EngineStatus::UpdateAvailable
        | EngineStatus::Verifying
        | EngineStatus::AttemptingRollback
        | EngineStatus::Disabled
        | EngineStatus::CleanupPreviousUpdate
        | EngineStatus::Unknown(_) => Transition::Ignore,
    }
}

/// Convert a progress fraction to a whole percentage, rounding half up
///
/// Out-of-range and NaN fractions are clamped into `0..=100`.
pub fn progress_percent(fraction: f32) -> u8 {
    let percent = (f64::from(fraction) * 100.0 + 0.5).floor();
    if percent.is_nan() {
        return 0;
    }
    percent.clamp(0.0, 100.0) as u8
}
