// # In-Memory Update Registry
//
// Reference implementation of the UpdateRegistry collaborator.
//
// ## Purpose
//
// Hosts embedding the orchestrator normally bring their own registry (the
// one that tracks downloads). This one keeps records in memory and fans
// notifications out over a broadcast channel, which is enough for the
// daemon and for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::Error;
use crate::traits::update_registry::{UpdateRecord, UpdateRegistry, UpdateStatus};

/// Capacity of the notification broadcast channel
const NOTIFICATION_CAPACITY: usize = 256;

/// Change notification fanned out to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateNotification {
    /// Install progress of the update changed
    ProgressChanged(String),
    /// Some field of the update changed
    StatusChanged(String),
    /// The update was deleted
    Deleted(String),
}

/// In-memory update registry
pub struct MemoryUpdateRegistry {
    records: RwLock<HashMap<String, UpdateRecord>>,
    notifications: broadcast::Sender<UpdateNotification>,
    /// Remove the backing file on delete
    delete_files: bool,
}

impl MemoryUpdateRegistry {
    /// Create an empty registry that deletes backing files on `delete_update`
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            notifications,
            delete_files: true,
        }
    }

    /// Keep backing files when records are deleted
    pub fn keep_files(mut self) -> Self {
        self.delete_files = false;
        self
    }

    /// Add or replace a record
    pub async fn insert(&self, record: UpdateRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Drop a record without touching its file
    pub async fn forget(&self, id: &str) -> Option<UpdateRecord> {
        self.records.write().await.remove(id)
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateNotification> {
        self.notifications.subscribe()
    }

    /// Stream of change notifications
    ///
    /// Notifications missed by a slow consumer are skipped with a warning.
    pub fn notifications(
        &self,
    ) -> Pin<Box<dyn Stream<Item = UpdateNotification> + Send + 'static>> {
        let stream =
            BroadcastStream::new(self.notifications.subscribe()).filter_map(|item| match item {
                Ok(notification) => Some(notification),
                Err(e) => {
                    tracing::warn!("Update notifications lagged: {}", e);
                    None
                }
            });
        Box::pin(stream)
    }

    /// Number of records held
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the registry holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn notify(&self, notification: UpdateNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }
}

impl Default for MemoryUpdateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateRegistry for MemoryUpdateRegistry {
    async fn get_update(&self, id: &str) -> Option<UpdateRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn set_status(&self, id: &str, status: UpdateStatus) -> Result<(), Error> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        record.status = status;
        Ok(())
    }

    async fn set_install_progress(&self, id: &str, progress: u8) -> Result<(), Error> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        record.install_progress = progress.min(100);
        Ok(())
    }

    async fn notify_install_progress(&self, id: &str) {
        self.notify(UpdateNotification::ProgressChanged(id.to_string()));
    }

    async fn notify_update_change(&self, id: &str) {
        self.notify(UpdateNotification::StatusChanged(id.to_string()));
    }

    async fn delete_update(&self, id: &str) -> Result<(), Error> {
        let record = self
            .records
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::not_found(id))?;

        if self.delete_files {
            match tokio::fs::remove_file(&record.file).await {
                Ok(()) => tracing::debug!("Deleted {}", record.file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", record.file.display(), e);
                    return Err(e.into());
                }
            }
        }

        self.notify(UpdateNotification::Deleted(id.to_string()));
        Ok(())
    }
}
