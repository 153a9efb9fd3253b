//! Architectural Contract Test: Engine Event Loop
//!
//! This test verifies that notifications pushed by the engine client reach
//! the orchestrator through its event loop, and that the loop shuts down
//! deterministically.
//!
//! Constraints verified:
//! - Notifications sent on the bound channel are applied in order
//! - The loop exits promptly on shutdown
//! - The loop can only be started once
//!
//! If this test fails, the channel between the engine client and the
//! orchestrator is broken.

mod common;

use abupd_core::traits::{UpdateRegistry, UpdateStatus};
use abupd_core::{EngineEvent, EngineStatus, Error, InstallerEvent};
use common::*;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn engine_notifications_drive_install_to_completion() {
    let mut harness = Harness::new();
    harness.add_update("update-1").await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let orchestrator = harness.orchestrator.clone();
    let event_loop = tokio::spawn(async move { orchestrator.run_with_shutdown(shutdown_rx).await });

    assert!(harness.orchestrator.install("update-1").await);

    harness
        .engine
        .emit(EngineEvent::status(EngineStatus::Downloading, 0.25));
    harness
        .engine
        .emit(EngineEvent::status(EngineStatus::Finalizing, 0.9));
    harness
        .engine
        .emit(EngineEvent::status(EngineStatus::UpdatedNeedReboot, 1.0));

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), harness.events.recv())
            .await
            .expect("installer event within timeout")
            .expect("event channel open");
        let done = matches!(event, InstallerEvent::Installed { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    assert_eq!(
        seen,
        vec![
            InstallerEvent::InstallStarted {
                id: "update-1".to_string()
            },
            InstallerEvent::ProgressChanged {
                id: "update-1".to_string(),
                progress: 25
            },
            InstallerEvent::ProgressChanged {
                id: "update-1".to_string(),
                progress: 90
            },
            InstallerEvent::Installed {
                id: "update-1".to_string()
            },
        ]
    );

    let record = harness.updates.get_update("update-1").await.unwrap();
    assert_eq!(record.status, UpdateStatus::Installed);
    assert_eq!(harness.marker_value().await, None);

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), event_loop)
        .await
        .expect("event loop exits on shutdown")
        .expect("event loop task does not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn shutdown_without_activity_exits_cleanly() {
    let harness = Harness::new();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let orchestrator = harness.orchestrator.clone();
    let event_loop = tokio::spawn(async move { orchestrator.run_with_shutdown(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), event_loop)
        .await
        .expect("event loop exits on shutdown")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(harness.engine.bind_call_count(), 0);
}

#[tokio::test]
async fn event_loop_starts_only_once() {
    let harness = Harness::new();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let orchestrator = harness.orchestrator.clone();
    let event_loop = tokio::spawn(async move { orchestrator.run_with_shutdown(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_second_tx, second_rx) = oneshot::channel();
    let second = harness.orchestrator.run_with_shutdown(second_rx).await;
    assert!(matches!(second, Err(Error::Config(_))));

    shutdown_tx.send(()).unwrap();
    event_loop.await.unwrap().unwrap();
}
