mod support;

use std::time::Duration;

use push_relay::{OwnershipState, RelayConfig, RelayError, SharingMode};
use support::{Origin, ScriptedTransport};

#[test_timeout::tokio_timeout_test(30, paused)]
async fn disposing_a_registration_removes_the_id_everywhere() {
    let origin = Origin::new();
    let config = RelayConfig::default();
    let window = origin.window("w0", config.clone(), ScriptedTransport::hanging());
    let first = window.register("p1", |_: &str, _: &str| {}).await.unwrap();
    let _second = window.register("p2", |_: &str, _: &str| {}).await.unwrap();
    assert_eq!(origin.registered_ids(&config).len(), 2);

    assert_eq!(first.push_id(), "p1");
    first.dispose();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let remaining = origin.registered_ids(&config);
    assert!(remaining.contains("p2"));
    assert!(!remaining.contains("p1"));
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn switching_backends_keeps_slot_values() {
    let origin = Origin::new();
    let shared = RelayConfig::default();
    let window = origin.window("w0", shared.clone(), ScriptedTransport::hanging());
    let _registration = window.register("p1", |_: &str, _: &str| {}).await.unwrap();

    let polled = RelayConfig {
        sharing: SharingMode::Polled,
        ..shared.clone()
    };
    assert!(origin.registered_ids(&polled).is_empty());
    window.reconfigure(polled.clone()).await.unwrap();
    assert!(origin.registered_ids(&polled).contains("p1"));
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn namespace_cannot_change_at_runtime() {
    let origin = Origin::new();
    let window = origin.window("w0", RelayConfig::default(), ScriptedTransport::hanging());
    let renamed = RelayConfig {
        namespace: "other".into(),
        ..RelayConfig::default()
    };
    let err = window.reconfigure(renamed).await.unwrap_err();
    assert!(matches!(err, RelayError::Config(_)));

    window.shutdown().await;
    assert!(matches!(window.pause(), Err(RelayError::Closed)));
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn duplicate_registrations_keep_the_id_until_both_are_gone() {
    let origin = Origin::new();
    let config = RelayConfig::default();
    let window = origin.window("w0", config.clone(), ScriptedTransport::hanging());
    let first = window.register("p1", |_: &str, _: &str| {}).await.unwrap();
    let second = window.register("p1", |_: &str, _: &str| {}).await.unwrap();

    drop(first);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(origin.registered_ids(&config).contains("p1"));

    second.dispose();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(origin.registered_ids(&config).is_empty());
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn paused_owner_reports_not_owner_until_resumed() {
    let origin = Origin::new();
    let window = origin.window("w0", RelayConfig::default(), ScriptedTransport::hanging());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(*window.ownership().borrow(), OwnershipState::Owner);

    window.pause().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*window.ownership().borrow(), OwnershipState::NotOwner);

    window.resume().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*window.ownership().borrow(), OwnershipState::Owner);
}
