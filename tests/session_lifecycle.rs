use std::sync::Arc;

use usblink::{ConnectionState, DeviceManager, LoopbackBackend, SessionConfig, SessionError};

#[tokio::test]
async fn test_discover_with_nothing_attached_returns_empty() {
    let manager = DeviceManager::with_backend(Arc::new(LoopbackBackend::new()));
    let devices = manager.discover().await.expect("empty discovery is not an error");
    assert!(devices.is_empty());
}

#[tokio::test]
async fn test_open_unknown_id_fails_with_not_found() {
    // An id minted by a different manager never resolves here.
    let other_backend = Arc::new(LoopbackBackend::new());
    other_backend.add_device("elsewhere", 0x1234, 0x5678, None);
    let other = DeviceManager::with_backend(other_backend);
    let foreign_id = other.discover().await.expect("discover")[0].id;

    let manager = DeviceManager::with_backend(Arc::new(LoopbackBackend::new()));
    assert!(manager.discover().await.expect("discover").is_empty());

    let result = manager.open(&foreign_id, SessionConfig::default()).await;
    assert!(matches!(result, Err(SessionError::DeviceNotFound)));
}

#[tokio::test]
async fn test_ids_are_stable_across_discovery_calls() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, Some("LB-0001"));
    let manager = DeviceManager::with_backend(backend);

    let first = manager.discover().await.expect("first discover");
    let second = manager.discover().await.expect("second discover");
    assert_eq!(first[0].id, second[0].id, "persistent port must keep its id");

    let cached = manager.devices();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, first[0].id);
}

#[tokio::test]
async fn test_second_open_on_held_device_is_busy() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend);
    let device = manager.discover().await.expect("discover")[0].clone();

    let _session = manager
        .open(&device.id, SessionConfig::default())
        .await
        .expect("first open succeeds");

    let second = manager.open(&device.id, SessionConfig::default()).await;
    assert!(matches!(second, Err(SessionError::DeviceBusy)));
}

#[tokio::test]
async fn test_concurrent_opens_exactly_one_wins() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = Arc::new(DeviceManager::with_backend(backend));
    let device = manager.discover().await.expect("discover")[0].clone();

    let (a, b) = tokio::join!(
        manager.open(&device.id, SessionConfig::default()),
        manager.open(&device.id, SessionConfig::default()),
    );

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1, "exactly one concurrent open may succeed");
    for result in [a, b] {
        if let Err(e) = result {
            assert!(matches!(e, SessionError::DeviceBusy), "loser must see DeviceBusy, got {e}");
        }
    }
}

#[tokio::test]
async fn test_close_is_idempotent_and_releases_the_device() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend);
    let device = manager.discover().await.expect("discover")[0].clone();

    let mut session = manager
        .open(&device.id, SessionConfig::default())
        .await
        .expect("open");
    assert!(session.is_open());

    session.close();
    assert!(!session.is_open());
    // Second close: no error, no state change.
    session.close();
    assert!(!session.is_open());

    let refreshed = manager.device(&device.id).expect("still in snapshot");
    assert_eq!(refreshed.connection_state, ConnectionState::Disconnected);

    // The handle is free for a subsequent open.
    let reopened = manager.open(&device.id, SessionConfig::default()).await;
    assert!(reopened.is_ok(), "reopen after close should succeed");
}

#[tokio::test]
async fn test_dropping_a_session_releases_the_device() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend);
    let device = manager.discover().await.expect("discover")[0].clone();

    {
        let _session = manager
            .open(&device.id, SessionConfig::default())
            .await
            .expect("open");
    }

    let reopened = manager.open(&device.id, SessionConfig::default()).await;
    assert!(reopened.is_ok(), "drop must release the reservation");
}

#[tokio::test]
async fn test_operations_after_close_fail_with_session_closed() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend);
    let device = manager.discover().await.expect("discover")[0].clone();

    let mut session = manager
        .open(&device.id, SessionConfig::default())
        .await
        .expect("open");
    session.close();

    assert!(matches!(
        session.send(&[0x01]).await,
        Err(SessionError::SessionClosed)
    ));
    assert!(matches!(
        session.receive().await,
        Err(SessionError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_failed_open_releases_the_reservation() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend.clone());
    let device = manager.discover().await.expect("discover")[0].clone();

    // Gone from the hardware but still in the snapshot, so open reserves
    // the device and then fails at the backend.
    backend.unplug("loop0");

    let first = manager.open(&device.id, SessionConfig::default()).await;
    assert!(matches!(first, Err(SessionError::DeviceNotFound)));

    // The reservation must not leak: a retry sees the same failure, not
    // DeviceBusy.
    let second = manager.open(&device.id, SessionConfig::default()).await;
    assert!(matches!(second, Err(SessionError::DeviceNotFound)));
}

#[tokio::test]
async fn test_failed_open_leaves_descriptor_state_untouched() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend.clone());
    let device = manager.discover().await.expect("discover")[0].clone();
    assert_eq!(device.connection_state, ConnectionState::Disconnected);

    backend.unplug("loop0");
    let result = manager.open(&device.id, SessionConfig::default()).await;
    assert!(result.is_err());

    let after = manager.device(&device.id).expect("still in snapshot");
    assert_eq!(
        after.connection_state,
        ConnectionState::Disconnected,
        "a failed open must leave the device exactly as it was"
    );
}

#[tokio::test]
async fn test_unplug_transitions_session_to_closed() {
    let backend = Arc::new(LoopbackBackend::new());
    backend.add_device("loop0", 0x2E8A, 0xA02F, None);
    let manager = DeviceManager::with_backend(backend.clone());
    let device = manager.discover().await.expect("discover")[0].clone();

    let mut session = manager
        .open(&device.id, SessionConfig::default())
        .await
        .expect("open");

    backend.unplug("loop0");

    // The failing call reports the transport error with its progress count.
    match session.send(&[0xAA, 0xBB]).await {
        Err(SessionError::Io { written, .. }) => assert_eq!(written, 0),
        other => panic!("expected Io error after unplug, got {other:?}"),
    }
    assert!(!session.is_open(), "disconnect must leave the session closed");

    // Later operations fail fast rather than hang.
    assert!(matches!(
        session.send(&[0x01]).await,
        Err(SessionError::SessionClosed)
    ));
    assert!(matches!(
        session.receive().await,
        Err(SessionError::SessionClosed)
    ));

    // Close from the recovery path stays a no-op.
    session.close();

    // The vanished device drops out of the next snapshot.
    let devices = manager.discover().await.expect("discover");
    assert!(devices.is_empty());
    let result = manager.open(&device.id, SessionConfig::default()).await;
    assert!(matches!(result, Err(SessionError::DeviceNotFound)));
}
