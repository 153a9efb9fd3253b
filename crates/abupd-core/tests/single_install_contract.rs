//! Architectural Contract Test: At Most One Install
//!
//! This test verifies that the install marker admits a single active
//! installation and that a successful install hands the right payload to
//! the applying service.
//!
//! Constraints verified:
//! - A second install while a marker is present is refused
//! - A refused install mutates no record
//! - The apply request carries the archive URL, offset, size sentinel and headers
//!
//! If this test fails, someone has:
//! - Moved the marker check outside the session lock
//! - Changed how the payload is located or described to the service

mod common;

use abupd_core::traits::{ApplyRequest, UpdateRegistry, UpdateStatus};
use abupd_core::{Error, InstallerEvent};
use common::*;

#[tokio::test]
async fn install_hands_payload_to_engine_and_writes_marker() {
    let mut harness = Harness::new();
    let archive = harness.add_update("update-1").await;

    assert!(harness.orchestrator.install("update-1").await);

    // Exactly one bind and one apply
    assert_eq!(harness.engine.bind_call_count(), 1);
    assert_eq!(harness.engine.apply_call_count(), 1);

    let requests = harness.engine.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, format!("file://{}", archive.display()));
    assert_eq!(request.offset, payload_offset(&archive));
    assert_eq!(request.size, ApplyRequest::TO_END_OF_FILE);
    assert_eq!(request.headers, HEADERS);

    // Marker and record reflect the running install
    assert_eq!(harness.marker_value().await.as_deref(), Some("update-1"));
    assert!(harness.orchestrator.is_installing_update().await.unwrap());
    assert!(harness.orchestrator.is_installing("update-1").await.unwrap());
    assert_eq!(
        harness.orchestrator.active_update_id().await.as_deref(),
        Some("update-1")
    );

    let record = harness.updates.get_update("update-1").await.unwrap();
    assert_eq!(record.status, UpdateStatus::Installing);

    let events = harness.drain_events();
    assert_eq!(
        events,
        vec![InstallerEvent::InstallStarted {
            id: "update-1".to_string()
        }]
    );
}

#[tokio::test]
async fn second_install_is_refused_without_mutation() {
    let mut harness = Harness::new();
    harness.add_update("update-1").await;
    harness.add_update("update-2").await;

    assert!(harness.orchestrator.install("update-1").await);
    harness.drain_events();

    let result = harness.orchestrator.try_install("update-2").await;
    assert!(matches!(result, Err(Error::AlreadyInstalling(ref id)) if id == "update-1"));

    // Nothing about update-2 changed, and the engine was not contacted again
    let record = harness.updates.get_update("update-2").await.unwrap();
    assert_eq!(record.status, UpdateStatus::Verified);
    assert_eq!(harness.engine.bind_call_count(), 1);
    assert_eq!(harness.engine.apply_call_count(), 1);
    assert_eq!(harness.marker_value().await.as_deref(), Some("update-1"));

    let events = harness.drain_events();
    assert!(matches!(
        events.as_slice(),
        [InstallerEvent::InstallRejected { id, .. }] if id == "update-2"
    ));
}

#[tokio::test]
async fn reinstalling_the_active_update_is_refused() {
    let harness = Harness::new();
    harness.add_update("update-1").await;

    assert!(harness.orchestrator.install("update-1").await);
    assert!(!harness.orchestrator.install("update-1").await);

    assert_eq!(harness.engine.apply_call_count(), 1);
}

#[tokio::test]
async fn concurrent_installs_admit_exactly_one() {
    let harness = Harness::new();
    for i in 0..4 {
        harness.add_update(&format!("update-{}", i)).await;
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        let orchestrator = harness.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.install(&format!("update-{}", i)).await
        }));
    }

    let mut started = 0;
    for handle in handles {
        if handle.await.unwrap() {
            started += 1;
        }
    }

    assert_eq!(started, 1, "exactly one install may start");
    assert_eq!(harness.engine.apply_call_count(), 1);

    let active = harness.marker_value().await.expect("marker written");
    let mut installing = 0;
    for i in 0..4 {
        let id = format!("update-{}", i);
        let record = harness.updates.get_update(&id).await.unwrap();
        if record.status == UpdateStatus::Installing {
            installing += 1;
            assert_eq!(id, active);
        } else {
            assert_eq!(record.status, UpdateStatus::Verified);
        }
    }
    assert_eq!(installing, 1);
}

#[tokio::test]
async fn install_after_terminal_outcome_is_admitted() {
    let harness = Harness::new();
    harness.add_update("update-1").await;
    harness.add_update("update-2").await;

    assert!(harness.orchestrator.install("update-1").await);
    harness
        .orchestrator
        .handle_engine_event(abupd_core::EngineEvent::status(
            abupd_core::EngineStatus::ReportingErrorEvent,
            0.0,
        ))
        .await;
    assert_eq!(harness.marker_value().await, None);

    assert!(harness.orchestrator.install("update-2").await);
    assert_eq!(harness.marker_value().await.as_deref(), Some("update-2"));
}
