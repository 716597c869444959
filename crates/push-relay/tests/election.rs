mod support;

use std::time::Duration;

use push_relay::{ListenResponse, OwnershipState, RelayConfig, RelayEvent};
use support::{next_event, owners, Origin, ScriptedTransport, Step};

#[test_timeout::tokio_timeout_test(30, paused)]
async fn three_windows_agree_on_one_owner() {
    let origin = Origin::new();
    let transport = ScriptedTransport::hanging();
    let windows: Vec<_> = ["w0", "w1", "w2"]
        .into_iter()
        .map(|id| origin.window(id, RelayConfig::default(), transport.clone()))
        .collect();
    let mut events: Vec<_> = windows.iter().map(|w| w.events()).collect();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let refs: Vec<_> = windows.iter().collect();
    let current = owners(&refs);
    assert_eq!(current.len(), 1, "owners: {current:?}");

    for rx in &mut events {
        let event = next_event(rx, |e| matches!(e, RelayEvent::ConnectionReestablished { .. })).await;
        assert_eq!(
            event,
            RelayEvent::ConnectionReestablished {
                owner: current[0].clone()
            }
        );
    }
    for window in &windows {
        if window.id() != current[0] {
            assert_eq!(*window.ownership().borrow(), OwnershipState::NotOwner);
        }
    }
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn crashed_owner_is_replaced_after_its_lease_expires() {
    let origin = Origin::new();
    let transport = ScriptedTransport::hanging();
    let windows: Vec<_> = ["w0", "w1", "w2"]
        .into_iter()
        .map(|id| origin.window(id, RelayConfig::default(), transport.clone()))
        .collect();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let refs: Vec<_> = windows.iter().collect();
    let first = owners(&refs).remove(0);

    let crashed = windows.iter().find(|w| w.id() == first).unwrap();
    crashed.abort();
    let survivors: Vec<_> = windows.iter().filter(|w| w.id() != first).collect();

    // Still within the lease: nobody takes over yet.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(owners(&survivors).is_empty());

    // Bound checked: lease expiry plus five ticks. The candidacy jitter alone can take 1.5
    // ticks, so lease + 1 tick is out of reach.
    tokio::time::sleep(Duration::from_millis(6000)).await;
    let replacement = owners(&survivors);
    assert_eq!(replacement.len(), 1);
    assert_ne!(replacement[0], first);
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn shutdown_hands_ownership_over_without_waiting_for_the_lease() {
    let origin = Origin::new();
    let transport = ScriptedTransport::hanging();
    let first = origin.window("w0", RelayConfig::default(), transport.clone());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = origin.window("w1", RelayConfig::default(), transport.clone());
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(owners(&[&first, &second]), vec!["w0".to_string()]);

    let mut events = first.events();
    first.shutdown().await;
    first.shutdown().await;
    assert_eq!(events.recv().await.unwrap(), RelayEvent::Stopped);
    assert_eq!(*first.ownership().borrow(), OwnershipState::NotOwner);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(owners(&[&second]), vec!["w1".to_string()]);
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn new_owner_continues_from_the_stored_sequence_and_browser() {
    let origin = Origin::new();
    let transport = ScriptedTransport::new([Step::Respond(ListenResponse::ok(
        r#"{"sequence_number": 9, "browser": "b-3"}"#,
    ))]);
    let first = origin.window("w0", RelayConfig::default(), transport.clone());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = origin.window("w1", RelayConfig::default(), transport.clone());
    let _registration = second.register("p1", |_: &str, _: &str| {}).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.window == "w0"));
    assert_eq!(requests[1].sequence_number, 9);

    first.abort();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(owners(&[&second]), vec!["w1".to_string()]);
    let requests = transport.requests();
    let taken_over = requests.last().unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(taken_over.window, "w1");
    assert_eq!(taken_over.sequence_number, 9);
    assert_eq!(taken_over.browser.as_deref(), Some("b-3"));
}
