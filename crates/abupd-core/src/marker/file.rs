// # File Marker Store
//
// File-based implementation of MarkerStore with crash recovery.
//
// ## Purpose
//
// Keeps the install marker across process restarts so a relaunched
// orchestrator can reconnect to an installation that is still running.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Automatic backup: keeps `.backup` of the last known good file
// - Recovery: falls back to the backup if the main file does not parse
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": {
//     "installing_ab_id": {
//       "value": "2024.10.18-nightly",
//       "updated_at": "2024-10-18T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::MarkerStoreConfig;
use crate::traits::marker_store::{MarkerStore, MarkerStoreFactory};

/// Marker file format version
const MARKER_FILE_VERSION: &str = "1.0";

/// One stored entry
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct MarkerEntry {
    value: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

/// Serializable marker file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct MarkerFileFormat {
    version: String,
    entries: HashMap<String, MarkerEntry>,
}

/// Outcome of reading one marker file from disk
enum Loaded {
    Missing,
    Entries(HashMap<String, MarkerEntry>),
    Corrupted(serde_json::Error),
}

/// File-based marker store with crash recovery
///
/// Every mutation is written through to disk before the call returns.
///
/// # Example
///
/// ```rust,no_run
/// use abupd_core::marker::FileMarkerStore;
/// use abupd_core::traits::MarkerStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileMarkerStore::new("/data/abupd/marker.json").await?;
///
///     store.set("installing_ab_id", "update-42").await?;
///     assert_eq!(store.get("installing_ab_id").await?.as_deref(), Some("update-42"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileMarkerStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, MarkerEntry>>,
}

impl FileMarkerStore {
    /// Create or load a file marker store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file
    /// 3. If it is corrupted, load the backup instead
    /// 4. If both are unusable, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create marker directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let entries = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Load entries, recovering from the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, MarkerEntry>, Error> {
        match Self::load(path).await? {
            Loaded::Missing => {
                tracing::debug!("Marker file does not exist: {}", path.display());
                Ok(HashMap::new())
            }
            Loaded::Entries(entries) => {
                tracing::debug!("Loaded marker file: {} entries", entries.len());
                Ok(entries)
            }
            Loaded::Corrupted(e) => {
                tracing::warn!(
                    "Marker file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                match Self::load(&backup_path).await? {
                    Loaded::Entries(entries) => {
                        tracing::info!("Recovered marker file from backup");
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore marker file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(entries)
                    }
                    Loaded::Missing => {
                        tracing::warn!("No backup file found. Starting with empty marker store.");
                        Ok(HashMap::new())
                    }
                    Loaded::Corrupted(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty marker store.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
        }
    }

    async fn load(path: &Path) -> Result<Loaded, Error> {
        if !path.exists() {
            return Ok(Loaded::Missing);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::marker_store(format!(
                "Failed to read marker file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: MarkerFileFormat = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => return Ok(Loaded::Corrupted(e)),
        };

        if file.version != MARKER_FILE_VERSION {
            tracing::warn!(
                "Marker file version mismatch: expected {}, got {}. Attempting to load anyway.",
                MARKER_FILE_VERSION,
                file.version
            );
        }

        Ok(Loaded::Entries(file.entries))
    }

    /// Write entries to disk atomically
    ///
    /// Called with the entry map already locked so concurrent writers
    /// cannot interleave their renames.
    async fn write(&self, entries: &HashMap<String, MarkerEntry>) -> Result<(), Error> {
        let file = MarkerFileFormat {
            version: MARKER_FILE_VERSION.to_string(),
            entries: entries.clone(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::marker_store(format!("Failed to serialize marker: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::marker_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::marker_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.sync_all().await.map_err(|e| {
                Error::marker_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create marker backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::marker_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Marker file written: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Path of the marker file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MarkerStore for FileMarkerStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MarkerEntry {
                value: value.to_string(),
                updated_at: chrono::Utc::now(),
            },
        );
        self.write(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_none() && !self.path.exists() {
            return Ok(());
        }
        self.write(&entries).await
    }

    async fn flush(&self) -> Result<(), Error> {
        // Writes are synchronous with each mutation
        Ok(())
    }
}

/// Factory for `MarkerStoreConfig::File`
#[derive(Debug, Default)]
pub struct FileMarkerStoreFactory;

#[async_trait]
impl MarkerStoreFactory for FileMarkerStoreFactory {
    async fn create(&self, config: &MarkerStoreConfig) -> Result<Box<dyn MarkerStore>, Error> {
        match config {
            MarkerStoreConfig::File { path } => Ok(Box::new(FileMarkerStore::new(path).await?)),
            other => Err(Error::config(format!(
                "File marker store cannot be built from {} configuration",
                other.type_name()
            ))),
        }
    }
}
