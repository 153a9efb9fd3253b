//! A/B install orchestrator
//!
//! The InstallOrchestrator is responsible for:
//! - Starting an installation through the applying service
//! - Owning the single "install in progress" marker
//! - Reconnecting to a running installation after a restart
//! - Applying engine notifications to update records
//!
//! ## Architecture
//!
//! ```text
//!   install(id) / reconnect()
//!             │
//!             ▼
//! ┌───────────────────────┐   bind / apply   ┌──────────────┐
//! │  InstallOrchestrator  │ ───────────────▶ │ EngineClient │
//! └───────────────────────┘                  └──────────────┘
//!     ▲       │       │                             │
//!     │       │       └──── marker ───┐             │
//!     │       ▼                       ▼             │
//!     │ ┌──────────────┐      ┌───────────────┐     │
//!     │ │UpdateRegistry│      │ InstallMarker │     │
//!     │ └──────────────┘      └───────────────┘     │
//!     └──────────── EngineEvent channel ◀───────────┘
//! ```
//!
//! ## Concurrency
//!
//! `install`, `reconnect` and engine event handling all take the same
//! session lock, which guards both the marker and the in-memory session.
//! An install holds it from the marker and session check until the marker
//! is written, so at most one install can be active and notifications for
//! it are only processed once it is fully recorded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::UpdaterConfig;
use crate::error::{Error, Result};
use crate::marker::InstallMarker;
use crate::payload::{PayloadDescriptor, PayloadLocator};
use crate::reconciler::{SessionState, Transition, reconcile};
use crate::traits::{
    ApplyRequest, EngineClient, EngineEvent, MarkerStore, UpdateRegistry, UpdateStatus,
};

/// Events emitted by the InstallOrchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerEvent {
    /// The payload was handed to the applying service
    InstallStarted { id: String },

    /// An install request was refused before anything was changed
    InstallRejected { id: String, reason: String },

    /// Install progress changed
    ProgressChanged { id: String, progress: u8 },

    /// The update was installed and needs a reboot
    Installed { id: String },

    /// The install failed
    InstallFailed { id: String, reason: String },

    /// Rebound to an installation recovered from the marker
    Reconnected { id: String },

    /// The marker was cleared without a record update
    MarkerCleared { id: String, reason: String },
}

/// Marker and session, guarded together
struct InstallState {
    marker: InstallMarker,
    session: SessionState,
}

/// Orchestrates A/B installs through an external applying service
///
/// ## Lifecycle
///
/// 1. Create with [`InstallOrchestrator::new()`]
/// 2. Start the event loop with
///    [`run_with_shutdown()`](Self::run_with_shutdown) (usually on its own
///    task, with the orchestrator in an `Arc`)
/// 3. Call [`install()`](Self::install) or, after a restart,
///    [`reconnect()`](Self::reconnect)
pub struct InstallOrchestrator {
    /// Applying service client
    client: Box<dyn EngineClient>,

    /// Owner of update records
    updates: std::sync::Arc<dyn UpdateRegistry>,

    /// Archive inspection
    locator: PayloadLocator,

    /// Marker + session
    state: Mutex<InstallState>,

    /// Delete the update file once installed
    auto_delete: AtomicBool,

    /// Handed to the engine client on every bind
    engine_tx: mpsc::UnboundedSender<EngineEvent>,

    /// Taken by the event loop
    engine_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<InstallerEvent>,
}

impl InstallOrchestrator {
    /// Create a new orchestrator
    ///
    /// # Parameters
    ///
    /// - `client`: Applying service client
    /// - `updates`: Update registry
    /// - `marker_store`: Durable store holding the install marker
    /// - `config`: Orchestrator configuration
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver yields
    /// installer events
    pub fn new(
        client: Box<dyn EngineClient>,
        updates: std::sync::Arc<dyn UpdateRegistry>,
        marker_store: Box<dyn MarkerStore>,
        config: &UpdaterConfig,
    ) -> Result<(Self, mpsc::Receiver<InstallerEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.installer.event_channel_capacity);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            client,
            updates,
            locator: PayloadLocator::new(&config.archive),
            state: Mutex::new(InstallState {
                marker: InstallMarker::new(marker_store, config.installer.marker_key.clone()),
                session: SessionState::default(),
            }),
            auto_delete: AtomicBool::new(config.installer.auto_delete_after_install),
            engine_tx,
            engine_rx: std::sync::Mutex::new(Some(engine_rx)),
            event_tx,
        };

        Ok((orchestrator, event_rx))
    }

    /// Install the update `id`
    ///
    /// Returns `false` if the install could not be started; see
    /// [`try_install()`](Self::try_install) for the reason.
    pub async fn install(&self, id: &str) -> bool {
        match self.try_install(id).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Install of {} not started: {}", id, e);
                false
            }
        }
    }

    /// Install the update `id`, reporting why it could not be started
    ///
    /// # Errors
    ///
    /// - `AlreadyInstalling`: a marker or an active session is present;
    ///   nothing was changed
    /// - `NotFound`: no record for `id`; nothing was changed
    /// - `FileMissing`: the record's file is gone; nothing was changed
    /// - `Io`: the record's file could not be checked; nothing was changed
    /// - `LocateFailed`, `BindFailed`, `EngineClient`: the record was moved
    ///   to `InstallationFailed`
    ///
    /// The marker is only written once the payload has been handed over.
    /// Once it has, the install counts as started even if the record or the
    /// marker cannot be updated.
    pub async fn try_install(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        let current = match state.marker.current().await? {
            Some(current) => Some(current),
            None => state.session.active_id.clone(),
        };
        if let Some(current) = current {
            error!("Already installing an update ({})", current);
            self.emit_event(InstallerEvent::InstallRejected {
                id: id.to_string(),
                reason: format!("already installing {}", current),
            });
            return Err(Error::AlreadyInstalling(current));
        }

        let Some(record) = self.updates.get_update(id).await else {
            error!("Update {} is not known", id);
            self.emit_event(InstallerEvent::InstallRejected {
                id: id.to_string(),
                reason: "update not known".to_string(),
            });
            return Err(Error::not_found(id));
        };

        let exists = match tokio::fs::try_exists(&record.file).await {
            Ok(exists) => exists,
            Err(e) => {
                error!("Cannot access {}: {}", record.file.display(), e);
                self.emit_event(InstallerEvent::InstallRejected {
                    id: id.to_string(),
                    reason: format!("cannot access update file: {}", e),
                });
                return Err(e.into());
            }
        };
        if !exists {
            error!("The given update doesn't exist: {}", record.file.display());
            self.emit_event(InstallerEvent::InstallRejected {
                id: id.to_string(),
                reason: "update file missing".to_string(),
            });
            return Err(Error::FileMissing(record.file));
        }

        // Reflect intent before touching the archive
        self.set_status(id, UpdateStatus::Installing).await?;

        let archive = match std::path::absolute(&record.file) {
            Ok(archive) => archive,
            Err(e) => return Err(self.abort_install(id, e.into()).await),
        };
        let descriptor = match self.locate(archive.clone()).await {
            Ok(descriptor) => descriptor,
            Err(e) => return Err(self.abort_install(id, e).await),
        };
        debug!(
            "Payload of {} at offset {} ({} bytes, {} headers)",
            id,
            descriptor.offset,
            descriptor.size,
            descriptor.headers.len()
        );

        if let Err(e) = self.client.bind(self.engine_tx.clone()).await {
            return Err(self.abort_install(id, e).await);
        }

        let request = ApplyRequest::for_archive(&archive, descriptor.offset, descriptor.headers);
        if let Err(e) = self.client.apply_payload(&request).await {
            return Err(self.abort_install(id, e).await);
        }

        // The service owns the job from here on; track it whatever happens next
        state.session = SessionState::installing(id);

        match self.set_status(id, UpdateStatus::Installing).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Update {} vanished after apply", id),
            Err(e) => warn!("Failed to mark {} as installing: {}", id, e),
        }

        // Without the marker only recovery after a restart is lost
        if let Err(e) = state.marker.write(id).await {
            error!("Failed to write install marker for {}: {}", id, e);
        }

        info!("Installing {} via {}", id, self.client.client_name());
        self.emit_event(InstallerEvent::InstallStarted { id: id.to_string() });
        Ok(())
    }

    /// Rebind to the installation recorded in the marker
    ///
    /// Returns `false` if there is no marker or the bind failed.
    pub async fn reconnect(&self) -> bool {
        match self.try_reconnect().await {
            Ok(()) => true,
            Err(e) => {
                error!("reconnect: {}", e);
                false
            }
        }
    }

    /// Rebind to the installation recorded in the marker
    ///
    /// The payload is not re-applied: the service keeps the running job
    /// across a rebind. The first status notification afterwards decides
    /// whether the marker was still accurate.
    ///
    /// # Errors
    ///
    /// - `NotInstalling`: no marker; no bind was attempted
    /// - `BindFailed`: the marker is kept so a later reconnect can retry
    pub async fn try_reconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let id = state.marker.current().await?.ok_or(Error::NotInstalling)?;

        state.session = SessionState::reconnecting(id.clone());
        if let Err(e) = self.client.bind(self.engine_tx.clone()).await {
            state.session.reset();
            return Err(e);
        }

        info!("Reconnected to installation of {}", id);
        self.emit_event(InstallerEvent::Reconnected { id });
        Ok(())
    }

    /// Whether any installation is marked as in progress
    pub async fn is_installing_update(&self) -> Result<bool> {
        self.state.lock().await.marker.is_installing().await
    }

    /// Whether `id` is the installation marked as in progress
    pub async fn is_installing(&self, id: &str) -> Result<bool> {
        self.state.lock().await.marker.is_installing_update(id).await
    }

    /// Identifier of the installation this process is tracking
    pub async fn active_update_id(&self) -> Option<String> {
        self.state.lock().await.session.active_id.clone()
    }

    /// Change whether installed updates are deleted
    ///
    /// Takes effect for the next successful install outcome.
    pub fn set_auto_delete_after_install(&self, enabled: bool) {
        self.auto_delete.store(enabled, Ordering::SeqCst);
    }

    /// Run the event loop until `shutdown` fires
    ///
    /// Every engine notification is passed to
    /// [`handle_engine_event()`](Self::handle_engine_event).
    ///
    /// # Errors
    ///
    /// `Config` if the event loop was already started.
    pub async fn run_with_shutdown(&self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut engine_rx = self
            .engine_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| Error::config("Installer event loop already started"))?;

        loop {
            tokio::select! {
                Some(event) = engine_rx.recv() => {
                    self.handle_engine_event(event).await;
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = self.state.lock().await.marker.flush().await {
            error!("Failed to flush marker store: {}", e);
        }
        Ok(())
    }

    /// Apply one engine notification
    ///
    /// Never fails: storage and registry errors are logged.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        let (status, percent) = match event {
            EngineEvent::StatusUpdate { status, percent } => (status, percent),
            EngineEvent::PayloadApplicationComplete { error_code } => {
                debug!("Payload application complete (error code {})", error_code);
                return;
            }
        };

        let mut state = self.state.lock().await;
        let record_present = match state.session.active_id.as_deref() {
            Some(id) => self.updates.get_update(id).await.is_some(),
            None => false,
        };

        let transition = reconcile(&state.session, record_present, status, percent);
        debug!("Engine status {:?} ({:.3}) -> {:?}", status, percent, transition);

        // Only the first status after a rebind can reveal a stale marker
        state.session.reconnecting = false;
        self.apply_transition(&mut state, transition).await;
    }

    async fn apply_transition(&self, state: &mut InstallState, transition: Transition) {
        let Some(id) = state.session.active_id.clone() else {
            return;
        };

        if transition.clears_marker() {
            self.installation_done(state, &id, transition).await;
        }

        match transition {
            Transition::Ignore => {}
            Transition::Progress(progress) => {
                match self.updates.set_install_progress(&id, progress).await {
                    Ok(()) => {
                        self.updates.notify_install_progress(&id).await;
                        self.emit_event(InstallerEvent::ProgressChanged {
                            id: id.clone(),
                            progress,
                        });
                    }
                    Err(e) if e.is_not_found() => {
                        self.installation_done(state, &id, Transition::RecordMissing)
                            .await;
                        self.emit_event(InstallerEvent::MarkerCleared {
                            id,
                            reason: "update record removed".to_string(),
                        });
                    }
                    Err(e) => warn!("Failed to record progress of {}: {}", id, e),
                }
            }
            Transition::Failed => {
                self.finish_record(&id, UpdateStatus::InstallationFailed).await;
                error!("Installation of {} failed", id);
                self.emit_event(InstallerEvent::InstallFailed {
                    id,
                    reason: "applying service reported an error".to_string(),
                });
            }
            Transition::Installed => {
                self.finish_record(&id, UpdateStatus::Installed).await;
                info!("Installed {}, reboot required", id);
                self.emit_event(InstallerEvent::Installed { id: id.clone() });

                if self.auto_delete.load(Ordering::SeqCst) {
                    if let Err(e) = self.updates.delete_update(&id).await {
                        warn!("Failed to delete installed update {}: {}", id, e);
                    }
                }
            }
            Transition::StaleMarker => {
                // Service restarted because we thought we were installing
                self.emit_event(InstallerEvent::MarkerCleared {
                    id,
                    reason: "applying service is idle".to_string(),
                });
            }
            Transition::RecordMissing => {
                self.emit_event(InstallerEvent::MarkerCleared {
                    id,
                    reason: "update record removed".to_string(),
                });
            }
        }
    }

    /// Clear the marker and end the session
    ///
    /// The only path that clears the marker.
    async fn installation_done(&self, state: &mut InstallState, id: &str, reason: Transition) {
        if let Err(e) = state.marker.clear().await {
            error!("Failed to clear install marker for {}: {}", id, e);
        }
        state.session.reset();
        debug!("Installation of {} done: {:?}", id, reason);
    }

    /// Reset progress and set a terminal status, tolerating a vanished record
    async fn finish_record(&self, id: &str, status: UpdateStatus) {
        let result = async {
            self.updates.set_install_progress(id, 0).await?;
            self.updates.set_status(id, status).await
        }
        .await;

        match result {
            Ok(()) => self.updates.notify_update_change(id).await,
            Err(e) if e.is_not_found() => debug!("Update {} vanished, nothing to update", id),
            Err(e) => warn!("Failed to update {}: {}", id, e),
        }
    }

    async fn set_status(&self, id: &str, status: UpdateStatus) -> Result<()> {
        self.updates.set_status(id, status).await?;
        self.updates.notify_update_change(id).await;
        Ok(())
    }

    /// Mark a started install as failed and hand back the cause
    async fn abort_install(&self, id: &str, cause: Error) -> Error {
        error!("Could not install {}: {}", id, cause);
        if let Err(e) = self.set_status(id, UpdateStatus::InstallationFailed).await {
            warn!("Failed to mark {} as failed: {}", id, e);
        }
        self.emit_event(InstallerEvent::InstallFailed {
            id: id.to_string(),
            reason: cause.to_string(),
        });
        cause
    }

    async fn locate(&self, archive: PathBuf) -> Result<PayloadDescriptor> {
        let locator = self.locator.clone();
        let path = archive.clone();
        tokio::task::spawn_blocking(move || locator.locate(&path))
            .await
            .map_err(|e| Error::locate_failed(&archive, format!("locate task failed: {}", e)))?
    }

    /// Emit an installer event
    fn emit_event(&self, event: InstallerEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Installer event channel full or closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installer_event_equality() {
        let event = InstallerEvent::ProgressChanged {
            id: "update-1".to_string(),
            progress: 37,
        };
        assert_eq!(event.clone(), event);
    }
}
