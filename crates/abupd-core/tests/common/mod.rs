//! Test doubles and common utilities for installer contract tests
//!
//! This module provides a controllable engine client, archive builders and
//! a harness wiring them to an orchestrator with in-memory collaborators.

#![allow(dead_code)]

use abupd_core::error::{Error, Result};
use abupd_core::traits::{ApplyRequest, EngineClient, EngineEvent, EngineEventSender, UpdateRecord};
use abupd_core::{
    InstallOrchestrator, InstallerEvent, MarkerStore, MemoryMarkerStore, MemoryUpdateRegistry,
    UpdaterConfig,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::mpsc;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

pub const HEADERS: [&str; 4] = [
    "FILE_HASH=lURPCIkIAjtMOyB/EjQcl8zDzqtD6Ta3tJef6G/+z7k=",
    "FILE_SIZE=1024",
    "METADATA_HASH=tBvj43QOB0Jn++JojcpVdbRLz0qdAuL+uTkSy7hokaw=",
    "METADATA_SIZE=97",
];

/// An engine client whose outcomes are chosen by the test
///
/// Clones share counters, so a test can keep one after boxing another
/// into the orchestrator.
#[derive(Clone, Default)]
pub struct MockEngineClient {
    bind_fails: Arc<AtomicBool>,
    apply_fails: Arc<AtomicBool>,
    bind_calls: Arc<AtomicUsize>,
    apply_calls: Arc<AtomicUsize>,
    requests: Arc<std::sync::Mutex<Vec<ApplyRequest>>>,
    sender: Arc<std::sync::Mutex<Option<EngineEventSender>>>,
}

impl MockEngineClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following bind fail
    pub fn fail_bind(&self, fail: bool) {
        self.bind_fails.store(fail, Ordering::SeqCst);
    }

    /// Make every following apply fail
    pub fn fail_apply(&self, fail: bool) {
        self.apply_fails.store(fail, Ordering::SeqCst);
    }

    pub fn bind_call_count(&self) -> usize {
        self.bind_calls.load(Ordering::SeqCst)
    }

    pub fn apply_call_count(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ApplyRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Push a notification as the applying service would
    pub fn emit(&self, event: EngineEvent) {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .expect("emit() requires a bound client")
            .send(event)
            .expect("orchestrator event channel open");
    }
}

#[async_trait::async_trait]
impl EngineClient for MockEngineClient {
    async fn bind(&self, events: EngineEventSender) -> Result<()> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        if self.bind_fails.load(Ordering::SeqCst) {
            return Err(Error::bind_failed("mock", "service unavailable"));
        }
        *self.sender.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn apply_payload(&self, request: &ApplyRequest) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.apply_fails.load(Ordering::SeqCst) {
            return Err(Error::engine_client("connection reset"));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "mock"
    }
}

/// Deterministic 1024-byte payload
/// A marker store that refuses every write
///
/// Reads and removals go to the wrapped memory store, so tests can still
/// inspect or seed its contents.
pub struct FailingMarkerStore {
    inner: MemoryMarkerStore,
}

impl FailingMarkerStore {
    pub fn new(inner: MemoryMarkerStore) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl MarkerStore for FailingMarkerStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::marker_store("disk full"))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

pub fn payload_bytes() -> Vec<u8> {
    (0..1024u32).map(|i| (i * 13 % 241) as u8).collect()
}

/// Write an update archive with the default entry layout
pub fn write_update_archive(path: &Path, payload_method: CompressionMethod) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());

    zip.start_file(
        "META-INF/com/android/metadata",
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
    )
    .unwrap();
    zip.write_all(b"ota-type=AB\npre-device=generic\n").unwrap();

    zip.start_file(
        "payload.bin",
        SimpleFileOptions::default().compression_method(payload_method),
    )
    .unwrap();
    zip.write_all(&payload_bytes()).unwrap();

    zip.start_file(
        "payload_properties.txt",
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
    )
    .unwrap();
    zip.write_all(format!("{}\n", HEADERS.join("\n")).as_bytes())
        .unwrap();

    zip.finish().unwrap();
}

/// Byte offset of the payload in an archive written by `write_update_archive`
pub fn payload_offset(path: &Path) -> u64 {
    let bytes = std::fs::read(path).unwrap();
    let payload = payload_bytes();
    bytes
        .windows(payload.len())
        .position(|window| window == payload.as_slice())
        .expect("payload stored verbatim") as u64
}

/// Orchestrator wired to test doubles
pub struct Harness {
    pub orchestrator: Arc<InstallOrchestrator>,
    pub events: mpsc::Receiver<InstallerEvent>,
    pub engine: MockEngineClient,
    pub updates: Arc<MemoryUpdateRegistry>,
    pub marker: MemoryMarkerStore,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(UpdaterConfig::default())
    }

    pub fn with_config(config: UpdaterConfig) -> Self {
        let marker = MemoryMarkerStore::new();
        Self::with_store(config, marker.clone(), Box::new(marker))
    }

    /// Harness whose marker store fails every write
    pub fn with_failing_marker() -> Self {
        let marker = MemoryMarkerStore::new();
        let store = FailingMarkerStore::new(marker.clone());
        Self::with_store(UpdaterConfig::default(), marker, Box::new(store))
    }

    fn with_store(
        config: UpdaterConfig,
        marker: MemoryMarkerStore,
        store: Box<dyn MarkerStore>,
    ) -> Self {
        let engine = MockEngineClient::new();
        let updates = Arc::new(MemoryUpdateRegistry::new());
        let (orchestrator, events) = InstallOrchestrator::new(
            Box::new(engine.clone()),
            updates.clone(),
            store,
            &config,
        )
        .expect("orchestrator construction succeeds");

        Self {
            orchestrator: Arc::new(orchestrator),
            events,
            engine,
            updates,
            marker,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Register a verified update backed by a freshly written archive
    pub async fn add_update(&self, id: &str) -> PathBuf {
        self.add_update_with(id, CompressionMethod::Stored).await
    }

    pub async fn add_update_with(&self, id: &str, payload_method: CompressionMethod) -> PathBuf {
        let path = self.dir.path().join(format!("{id}.zip"));
        write_update_archive(&path, payload_method);
        self.updates.insert(UpdateRecord::new(id, &path)).await;
        path
    }

    /// Current marker value
    pub async fn marker_value(&self) -> Option<String> {
        self.marker.get("installing_ab_id").await.unwrap()
    }

    /// Collect every installer event emitted so far
    pub fn drain_events(&mut self) -> Vec<InstallerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
