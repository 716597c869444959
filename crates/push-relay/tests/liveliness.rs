mod support;

use std::collections::BTreeSet;
use std::time::Duration;

use push_relay::{OwnershipState, RelayConfig};
use support::{owners, Origin, ScriptedTransport};

#[test_timeout::tokio_timeout_test(30, paused)]
async fn ids_of_a_crashed_window_expire_after_five_silent_rounds() {
    let origin = Origin::new();
    let config = RelayConfig::default();
    let transport = ScriptedTransport::hanging();
    let mut windows = Vec::new();
    let mut registrations = Vec::new();
    for id in ["w0", "w1", "w2"] {
        let window = origin.window(id, config.clone(), transport.clone());
        registrations.push(
            window
                .register(format!("p-{id}"), |_: &str, _: &str| {})
                .await
                .unwrap(),
        );
        windows.push(window);
    }

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let refs: Vec<_> = windows.iter().collect();
    let owner = owners(&refs).remove(0);
    let crashed = windows.iter().find(|w| w.id() != owner).unwrap();
    let crashed_id = format!("p-{}", crashed.id());
    crashed.abort();

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(origin.registered_ids(&config).contains(&crashed_id));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let remaining = origin.registered_ids(&config);
    assert_eq!(remaining.len(), 2, "remaining: {remaining:?}");
    assert!(!remaining.contains(&crashed_id));
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn polled_storage_never_expires_ids() {
    let origin = Origin::new();
    let config = support::polled_config();
    let transport = ScriptedTransport::hanging();
    let survivor = origin.window("w0", config.clone(), transport.clone());
    let crashed = origin.window("w1", config.clone(), transport.clone());
    let _kept = survivor.register("p-w0", |_: &str, _: &str| {}).await.unwrap();
    let _lost = crashed.register("p-w1", |_: &str, _: &str| {}).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    crashed.abort();
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(origin.registered_ids(&config).len(), 2);
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn monitoring_moves_to_the_next_owner() {
    let origin = Origin::new();
    let config = RelayConfig::default();
    let transport = ScriptedTransport::hanging();
    let first = origin.window("w0", config.clone(), transport.clone());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = origin.window("w1", config.clone(), transport.clone());
    let crashed = origin.window("w2", config.clone(), transport.clone());
    let _first_id = first.register("p-w0", |_: &str, _: &str| {}).await.unwrap();
    let _second_id = second.register("p-w1", |_: &str, _: &str| {}).await.unwrap();
    let _crashed_id = crashed.register("p-w2", |_: &str, _: &str| {}).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(owners(&[&first, &second]), vec!["w0".to_string()]);

    crashed.abort();
    first.pause().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*first.ownership().borrow(), OwnershipState::NotOwner);

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(owners(&[&first, &second]), vec!["w1".to_string()]);
    assert!(origin.registered_ids(&config).contains("p-w2"));

    // The paused window still answers for its id; only the crashed one goes.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let remaining = origin.registered_ids(&config);
    assert_eq!(
        remaining,
        BTreeSet::from(["p-w0".to_string(), "p-w1".to_string()])
    );
}
