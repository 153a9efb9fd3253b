// # abupdd - A/B Update Daemon
//
// This daemon is a THIN integration layer over abupd-core:
// - DO NOT add install, marker or reconciliation logic here
// - All installer logic MUST be in abupd-core
// - Configuration is via environment variables ONLY
//
// The abupdd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering engine clients and marker stores
// 4. Reconnecting to an install recorded in the marker, or starting one
// 5. Running the orchestrator until the install finishes or a signal arrives
//
// ## Configuration
//
// ### Applying service
// - `ABUPD_ENGINE_SOCKET`: Unix socket of the applying service
//
// ### Marker
// - `ABUPD_MARKER_STORE_TYPE`: Type of marker store (file, memory)
// - `ABUPD_MARKER_STORE_PATH`: Path to marker file (for file store)
//
// ### Archive layout
// - `ABUPD_PAYLOAD_PATH`: Archive entry holding the payload
// - `ABUPD_PROPERTIES_PATH`: Archive entry holding the payload properties
//
// ### Install
// - `ABUPD_INSTALL_ID`: Identifier of the update to install
// - `ABUPD_INSTALL_FILE`: Archive of that update
// - `ABUPD_AUTO_DELETE`: Delete the archive once installed (true/false)
//
// ## Example
//
// ```bash
// export ABUPD_ENGINE_SOCKET=/run/update_engine/engine.sock
// export ABUPD_MARKER_STORE_TYPE=file
// export ABUPD_MARKER_STORE_PATH=/var/lib/abupd/marker.json
// export ABUPD_INSTALL_ID=2026.10.18
// export ABUPD_INSTALL_FILE=/data/updates/update-2026.10.18.zip
//
// abupdd
// ```

use abupd_core::traits::{UpdateRecord, UpdateStatus};
use abupd_core::{
    ArchiveConfig, ComponentRegistry, EngineClientConfig, InstallOrchestrator, InstallerConfig,
    InstallerEvent, MarkerStoreConfig, MemoryUpdateRegistry, UpdateRegistry, UpdaterConfig,
};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (including a failed install)
#[derive(Debug, Clone, Copy)]
enum AbupdExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<AbupdExitCode> for ExitCode {
    fn from(code: AbupdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
struct Config {
    engine_socket: String,
    marker_store_type: String,
    marker_store_path: String,
    payload_path: String,
    properties_path: String,
    install_id: Option<String>,
    install_file: Option<PathBuf>,
    auto_delete: bool,
    log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_socket: "/run/update_engine/engine.sock".to_string(),
            marker_store_type: "file".to_string(),
            marker_store_path: "/var/lib/abupd/marker.json".to_string(),
            payload_path: ArchiveConfig::default().payload_path,
            properties_path: ArchiveConfig::default().properties_path,
            install_id: None,
            install_file: None,
            auto_delete: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            engine_socket: env::var("ABUPD_ENGINE_SOCKET").unwrap_or(defaults.engine_socket),
            marker_store_type: env::var("ABUPD_MARKER_STORE_TYPE")
                .unwrap_or(defaults.marker_store_type),
            marker_store_path: env::var("ABUPD_MARKER_STORE_PATH")
                .unwrap_or(defaults.marker_store_path),
            payload_path: env::var("ABUPD_PAYLOAD_PATH").unwrap_or(defaults.payload_path),
            properties_path: env::var("ABUPD_PROPERTIES_PATH")
                .unwrap_or(defaults.properties_path),
            install_id: env::var("ABUPD_INSTALL_ID").ok().filter(|s| !s.is_empty()),
            install_file: env::var("ABUPD_INSTALL_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            auto_delete: match env::var("ABUPD_AUTO_DELETE") {
                Ok(value) => parse_bool(&value).context("ABUPD_AUTO_DELETE")?,
                Err(_) => defaults.auto_delete,
            },
            log_level: env::var("ABUPD_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.engine_socket.is_empty() {
            anyhow::bail!("ABUPD_ENGINE_SOCKET cannot be empty");
        }

        match self.marker_store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "ABUPD_MARKER_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.marker_store_type
            ),
        }

        if self.marker_store_type == "file" {
            if self.marker_store_path.is_empty() {
                anyhow::bail!(
                    "ABUPD_MARKER_STORE_PATH cannot be empty when ABUPD_MARKER_STORE_TYPE=file"
                );
            }

            if let Some(parent) = std::path::Path::new(&self.marker_store_path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "ABUPD_MARKER_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        match (&self.install_id, &self.install_file) {
            (Some(_), None) => {
                anyhow::bail!("ABUPD_INSTALL_FILE is required when ABUPD_INSTALL_ID is set")
            }
            (None, Some(_)) => {
                anyhow::bail!("ABUPD_INSTALL_ID is required when ABUPD_INSTALL_FILE is set")
            }
            _ => {}
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ABUPD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.updater_config()
            .validate()
            .context("Invalid updater configuration")?;

        Ok(())
    }

    /// Build the library configuration
    fn updater_config(&self) -> UpdaterConfig {
        let marker_store = match self.marker_store_type.as_str() {
            "file" => MarkerStoreConfig::File {
                path: self.marker_store_path.clone(),
            },
            _ => MarkerStoreConfig::Memory,
        };

        UpdaterConfig {
            archive: ArchiveConfig {
                payload_path: self.payload_path.clone(),
                properties_path: self.properties_path.clone(),
            },
            marker_store,
            engine: EngineClientConfig::Socket {
                path: self.engine_socket.clone(),
            },
            installer: InstallerConfig::default().with_auto_delete(self.auto_delete),
        }
    }
}

/// Parse a boolean environment value
fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("'{}' is not a boolean", other),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return AbupdExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return AbupdExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return AbupdExitCode::ConfigError.into();
    }

    info!("Starting abupdd daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AbupdExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            AbupdExitCode::RuntimeError
        } else {
            AbupdExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let updater_config = config.updater_config();

    // Create component registry
    let registry = ComponentRegistry::with_builtin_stores();

    #[cfg(feature = "socket")]
    {
        info!("Registering socket engine client");
        abupd_engine_socket::register(&registry);
    }
    debug!("Engine clients: {:?}", registry.list_engine_clients());

    let client = registry
        .create_engine_client(&updater_config.engine)
        .context("Failed to create engine client")?;
    let marker_store = registry
        .create_marker_store(&updater_config.marker_store)
        .await
        .context("Failed to create marker store")?;

    let updates = Arc::new(MemoryUpdateRegistry::new());
    let (orchestrator, events) =
        InstallOrchestrator::new(client, updates.clone(), marker_store, &updater_config)?;
    let orchestrator = Arc::new(orchestrator);

    info!("Engine client: {}", updater_config.engine.type_name());
    info!("Marker store: {}", updater_config.marker_store.type_name());

    let mut notifications = updates.notifications();
    let notification_log = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            debug!("Update registry: {:?}", notification);
        }
    });

    // Start the event loop before anything can bind
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let event_loop = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_with_shutdown(shutdown_rx).await })
    };

    let started = start(&config, &orchestrator, &updates).await;

    let outcome = match started {
        Ok(true) => {
            info!("Waiting for the install to finish");
            tokio::select! {
                outcome = wait_for_outcome(events) => outcome,
                signal = wait_for_shutdown() => {
                    let signal = signal?;
                    info!("Received shutdown signal: {}", signal);
                    Ok(())
                }
            }
        }
        Ok(false) => {
            info!("No update to install");
            Ok(())
        }
        Err(e) => Err(e),
    };

    info!("Shutting down daemon");
    let _ = shutdown_tx.send(());
    match event_loop.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Event loop error: {}", e),
        Err(e) => warn!("Event loop task failed: {}", e),
    }
    notification_log.abort();

    outcome
}

/// Reconnect to a recorded install or start the configured one
///
/// Returns whether an install is now being tracked.
async fn start(
    config: &Config,
    orchestrator: &InstallOrchestrator,
    updates: &MemoryUpdateRegistry,
) -> Result<bool> {
    let request = config.install_id.clone().zip(config.install_file.clone());

    if orchestrator.is_installing_update().await? {
        // Restore the record the marker refers to, if it was handed to us
        if let Some((id, file)) = &request
            && orchestrator.is_installing(id).await?
        {
            let mut record = UpdateRecord::new(id.clone(), file.clone());
            record.status = UpdateStatus::Installing;
            updates.insert(record).await;
        }

        info!("Found an install marker, reconnecting");
        if orchestrator.reconnect().await {
            return Ok(true);
        }
        anyhow::bail!("Could not reconnect to the applying service");
    }

    let Some((id, file)) = request else {
        return Ok(false);
    };

    updates.insert(UpdateRecord::new(id.clone(), file)).await;
    orchestrator
        .try_install(&id)
        .await
        .with_context(|| format!("Failed to install {}", id))?;

    if let Some(record) = updates.get_update(&id).await {
        info!("Update {} is {:?}", id, record.status);
    }
    Ok(true)
}

/// Log installer events until the tracked install reaches an outcome
async fn wait_for_outcome(mut events: mpsc::Receiver<InstallerEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            InstallerEvent::InstallStarted { id } => info!("Install of {} started", id),
            InstallerEvent::Reconnected { id } => info!("Reconnected to install of {}", id),
            InstallerEvent::ProgressChanged { id, progress } => {
                info!("Installing {}: {}%", id, progress)
            }
            InstallerEvent::InstallRejected { id, reason } => {
                warn!("Install of {} rejected: {}", id, reason)
            }
            InstallerEvent::Installed { id } => {
                info!("Installed {}, reboot to finish the update", id);
                return Ok(());
            }
            InstallerEvent::InstallFailed { id, reason } => {
                anyhow::bail!("Install of {} failed: {}", id, reason);
            }
            InstallerEvent::MarkerCleared { id, reason } => {
                info!("No install of {} in progress: {}", id, reason);
                return Ok(());
            }
        }
    }

    anyhow::bail!("Installer event channel closed")
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        Config {
            marker_store_type: "memory".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_memory_config_is_valid() {
        assert!(memory_config().validate().is_ok());
    }

    #[test]
    fn test_install_id_requires_file() {
        let config = Config {
            install_id: Some("update-1".to_string()),
            ..memory_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_store_type_rejected() {
        let config = Config {
            marker_store_type: "redis".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identical_entry_paths_rejected() {
        let config = Config {
            properties_path: "payload.bin".to_string(),
            ..memory_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_updater_config_mapping() {
        let dir = std::env::temp_dir();
        let config = Config {
            marker_store_path: dir.join("marker.json").display().to_string(),
            auto_delete: true,
            ..Config::default()
        };

        let updater = config.updater_config();
        assert_eq!(updater.marker_store.type_name(), "file");
        assert_eq!(updater.engine.type_name(), "socket");
        assert!(updater.installer.auto_delete_after_install);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool(" YES ").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(!parse_bool("").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
