mod support;

use std::time::Duration;

use push_relay::{RelayConfig, SharingMode};
use slot_store::SlotStore;
use support::{notifications_body, polled_config, Inbox, Origin, ScriptedTransport, Step};

async fn deliver_to_three_windows(config: RelayConfig) -> (Origin, Vec<(String, String)>) {
    let origin = Origin::new();
    let transport = ScriptedTransport::new([Step::Respond(notifications_body(
        &["a", "b"],
        "hello",
    ))]);
    let inbox = Inbox::default();
    let mut registrations = Vec::new();
    let mut windows = Vec::new();
    for (id, push_id) in [("w0", "a"), ("w1", "b"), ("w2", "c")] {
        let window = origin.window(id, config.clone(), transport.clone());
        registrations.push(window.register(push_id, inbox.callback()).await.unwrap());
        windows.push(window);
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.request_count(), 2);
    let mut received = inbox.received();
    received.sort();
    (origin, received)
}

fn expected() -> Vec<(String, String)> {
    vec![
        ("a".to_string(), "hello".to_string()),
        ("b".to_string(), "hello".to_string()),
    ]
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn instant_storage_fans_out_once_per_id() {
    let (_origin, received) = deliver_to_three_windows(RelayConfig::default()).await;
    assert_eq!(received, expected());
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn polled_storage_fans_out_and_drains_the_buffer() {
    let config = polled_config();
    let (origin, received) = deliver_to_three_windows(config.clone()).await;
    assert_eq!(received, expected());

    let observer = origin.backends.open(SharingMode::Polled, "observer");
    assert_eq!(observer.get("push.notifications"), "");
}
