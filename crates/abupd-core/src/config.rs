//! Configuration types for the A/B update orchestrator
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Layout of the update archive
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Where the install marker is persisted
    #[serde(default)]
    pub marker_store: MarkerStoreConfig,

    /// How to reach the applying service
    #[serde(default)]
    pub engine: EngineClientConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub installer: InstallerConfig,
}

impl UpdaterConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.archive.validate()?;
        self.marker_store.validate()?;
        self.engine.validate()?;
        self.installer.validate()?;
        Ok(())
    }
}

/// Paths of the entries inside an update archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Entry holding the payload binary (must be stored uncompressed)
    #[serde(default = "default_payload_path")]
    pub payload_path: String,

    /// Entry holding the `key=value` payload properties
    #[serde(default = "default_properties_path")]
    pub properties_path: String,
}

impl ArchiveConfig {
    /// Validate the archive layout
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.payload_path.is_empty() {
            return Err(crate::Error::config("Payload entry path cannot be empty"));
        }
        if self.properties_path.is_empty() {
            return Err(crate::Error::config("Properties entry path cannot be empty"));
        }
        if self.payload_path == self.properties_path {
            return Err(crate::Error::config(
                "Payload and properties entries must be different",
            ));
        }
        Ok(())
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            payload_path: default_payload_path(),
            properties_path: default_properties_path(),
        }
    }
}

fn default_payload_path() -> String {
    "payload.bin".to_string()
}

fn default_properties_path() -> String {
    "payload_properties.txt".to_string()
}

/// Marker store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkerStoreConfig {
    /// File-based marker store
    File {
        /// Path to the marker file
        path: String,
    },

    /// In-memory marker store (not persistent)
    #[default]
    Memory,

    /// Custom marker store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl MarkerStoreConfig {
    /// Validate the marker store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            MarkerStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("Marker store path cannot be empty"))
            }
            MarkerStoreConfig::Custom { factory, .. } if factory.is_empty() => Err(
                crate::Error::config("Custom marker store factory cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            MarkerStoreConfig::File { .. } => "file",
            MarkerStoreConfig::Memory => "memory",
            MarkerStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineClientConfig {
    /// Unix domain socket of the applying service
    Socket {
        /// Socket path
        path: String,
    },

    /// Custom engine client
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl EngineClientConfig {
    /// Validate the engine client configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            EngineClientConfig::Socket { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("Engine socket path cannot be empty"));
                }
                Ok(())
            }
            EngineClientConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom engine client factory cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the client type name
    pub fn type_name(&self) -> &str {
        match self {
            EngineClientConfig::Socket { .. } => "socket",
            EngineClientConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for EngineClientConfig {
    fn default() -> Self {
        EngineClientConfig::Socket {
            path: "/run/update_engine/engine.sock".to_string(),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Name of the marker entry in the marker store
    #[serde(default = "default_marker_key")]
    pub marker_key: String,

    /// Request deletion of the update file once it is installed
    ///
    /// This is only the initial value; the orchestrator reads its own copy
    /// at the moment an install succeeds.
    #[serde(default)]
    pub auto_delete_after_install: bool,

    /// Capacity of the installer event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl InstallerConfig {
    /// Validate the installer settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.marker_key.is_empty() {
            return Err(crate::Error::config("Marker key cannot be empty"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Enable or disable deleting the update after a successful install
    pub fn with_auto_delete(mut self, enabled: bool) -> Self {
        self.auto_delete_after_install = enabled;
        self
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            marker_key: default_marker_key(),
            auto_delete_after_install: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_marker_key() -> String {
    "installing_ab_id".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = UpdaterConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.archive.payload_path, "payload.bin");
        assert_eq!(config.installer.marker_key, "installing_ab_id");
        assert!(!config.installer.auto_delete_after_install);
    }

    #[test]
    fn test_same_entry_paths_rejected() {
        let mut config = UpdaterConfig::new();
        config.archive.properties_path = config.archive.payload_path.clone();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: UpdaterConfig = serde_json::from_value(serde_json::json!({
            "marker_store": { "type": "file", "path": "/data/abupd/marker.json" },
            "installer": { "auto_delete_after_install": true }
        }))
        .unwrap();

        assert_eq!(config.marker_store.type_name(), "file");
        assert!(config.installer.auto_delete_after_install);
        assert_eq!(config.installer.event_channel_capacity, 1000);
        assert_eq!(config.archive, ArchiveConfig::default());
    }
}
