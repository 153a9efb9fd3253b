// # Socket Engine Client
//
// This crate provides an EngineClient that talks to the applying service
// over a Unix domain socket.
//
// ## Protocol
//
// Newline-delimited JSON in both directions.
//
// Service to client:
//
// ```text
// {"type":"status_update","status":3,"percent":0.5}
// {"type":"payload_application_complete","error_code":0}
// ```
//
// Client to service:
//
// ```text
// {"type":"apply_payload","url":"file:///data/update.zip","offset":1234,"size":0,"headers":["FILE_HASH=..."]}
// ```
//
// ## Architectural Constraints
//
// - ✅ One reader task per connection, forwarding notifications to the orchestrator
// - ✅ Rebinding replaces the connection and stops the previous reader
// - ❌ NO retries on connect (a failed bind is reported to the orchestrator)
// - ❌ NO interpretation of statuses (owned by the reconciler)

use abupd_core::config::EngineClientConfig;
use abupd_core::traits::{
    ApplyRequest, EngineClient, EngineClientFactory, EngineEvent, EngineEventSender, EngineStatus,
};
use abupd_core::{ComponentRegistry, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Name used in logs and errors
const CLIENT_NAME: &str = "socket";

/// How long to wait for the service to accept a connection
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Message sent by the applying service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServiceMessage {
    StatusUpdate { status: i32, percent: f32 },
    PayloadApplicationComplete { error_code: i32 },
}

impl From<ServiceMessage> for EngineEvent {
    fn from(message: ServiceMessage) -> Self {
        match message {
            ServiceMessage::StatusUpdate { status, percent } => EngineEvent::StatusUpdate {
                status: EngineStatus::from_code(status),
                percent,
            },
            ServiceMessage::PayloadApplicationComplete { error_code } => {
                EngineEvent::PayloadApplicationComplete { error_code }
            }
        }
    }
}

/// Message sent to the applying service
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    ApplyPayload(&'a ApplyRequest),
}

/// A live connection to the applying service
struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Engine client backed by a Unix domain socket
pub struct SocketEngineClient {
    path: PathBuf,
    connection: Mutex<Option<Connection>>,
}

impl SocketEngineClient {
    /// Create a client for the service listening on `path`
    ///
    /// No connection is made until [`EngineClient::bind`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connection: Mutex::new(None),
        }
    }

    /// Socket path of the applying service
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<UnixStream> {
        match tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::bind_failed(CLIENT_NAME, connect_hint(&self.path, &e))),
            Err(_) => Err(Error::bind_failed(
                CLIENT_NAME,
                format!("connection to {} timed out", self.path.display()),
            )),
        }
    }
}

/// Describe a connect failure
fn connect_hint(path: &Path, error: &std::io::Error) -> String {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::NotFound => format!(
            "socket not found at {}, is the applying service running?",
            path.display()
        ),
        ErrorKind::ConnectionRefused => format!(
            "connection refused at {}, is the applying service running?",
            path.display()
        ),
        ErrorKind::PermissionDenied => {
            format!("permission denied accessing {}", path.display())
        }
        _ => format!("failed to connect to {}: {}", path.display(), error),
    }
}

/// Forward service notifications until the connection or the orchestrator goes away
async fn read_events(reader: OwnedReadHalf, events: EngineEventSender) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let message: ServiceMessage = match serde_json::from_str(line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed engine message: {}", e);
                        continue;
                    }
                };
                tracing::trace!("Engine message: {:?}", message);

                if events.send(message.into()).is_err() {
                    tracing::debug!("Orchestrator dropped its event receiver");
                    break;
                }
            }
            Ok(None) => {
                tracing::warn!("Applying service closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read from applying service: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl EngineClient for SocketEngineClient {
    async fn bind(&self, events: EngineEventSender) -> Result<()> {
        let stream = self.connect().await?;
        let (reader, writer) = stream.into_split();
        let reader = tokio::spawn(read_events(reader, events));

        let previous = self
            .connection
            .lock()
            .await
            .replace(Connection { writer, reader });
        if previous.is_some() {
            tracing::debug!("Replaced previous connection to {}", self.path.display());
        }

        tracing::info!("Bound to applying service at {}", self.path.display());
        Ok(())
    }

    async fn apply_payload(&self, request: &ApplyRequest) -> Result<()> {
        let mut line = serde_json::to_string(&ClientMessage::ApplyPayload(request))?;
        line.push('\n');

        let mut connection = self.connection.lock().await;
        let connection = connection
            .as_mut()
            .ok_or_else(|| Error::engine_client("not bound to the applying service"))?;

        connection
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::engine_client(format!("failed to send apply request: {}", e)))?;
        connection
            .writer
            .flush()
            .await
            .map_err(|e| Error::engine_client(format!("failed to send apply request: {}", e)))?;

        tracing::debug!(
            "Requested payload application of {} at offset {}",
            request.url,
            request.offset
        );
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        CLIENT_NAME
    }
}

/// Factory for `EngineClientConfig::Socket`
pub struct SocketEngineClientFactory;

impl EngineClientFactory for SocketEngineClientFactory {
    fn create(&self, config: &EngineClientConfig) -> Result<Box<dyn EngineClient>> {
        match config {
            EngineClientConfig::Socket { path } => {
                if path.is_empty() {
                    return Err(Error::config("Engine socket path cannot be empty"));
                }
                Ok(Box::new(SocketEngineClient::new(path)))
            }
            _ => Err(Error::config("Invalid config for socket engine client")),
        }
    }
}

/// Register the socket engine client with a component registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_engine_client(CLIENT_NAME, Box::new(SocketEngineClientFactory));
}
