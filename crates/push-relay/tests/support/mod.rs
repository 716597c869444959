#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use push_relay::protocol::ListenRequest;
use push_relay::{
    Clock, ListenResponse, OwnershipState, PollTransport, RelayConfig, RelayEvent, SharingMode,
    SlotBackends, TransportError, Window, WindowBuilder,
};
use slot_store::{SlotStore, DEFAULT_BOUNDED_CAPACITY};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// What the fake server does with the next request.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(ListenResponse),
    Fail(TransportError),
    /// Never answers, like a long-poll with nothing to say.
    Hang,
}

/// Plays back a queue of steps and records every request. Hangs once the queue is empty.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ListenRequest>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn hanging() -> Arc<Self> {
        Self::new([])
    }

    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    pub fn requests(&self) -> Vec<ListenRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl PollTransport for ScriptedTransport {
    async fn listen(
        &self,
        request: &ListenRequest,
        _timeout: Duration,
    ) -> Result<ListenResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let step = self.script.lock().pop_front().unwrap_or(Step::Hang);
        match step {
            Step::Respond(response) => Ok(response),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Windows of one logical client: shared backends and one clock.
pub struct Origin {
    pub backends: SlotBackends,
    pub clock: Clock,
}

impl Origin {
    pub fn new() -> Self {
        Self {
            backends: SlotBackends::in_process(DEFAULT_BOUNDED_CAPACITY),
            clock: Clock::new(),
        }
    }

    pub fn window(
        &self,
        id: &str,
        config: RelayConfig,
        transport: Arc<ScriptedTransport>,
    ) -> Window {
        WindowBuilder::new(config, self.backends.clone(), transport)
            .clock(self.clock)
            .window_id(id)
            .spawn()
            .expect("window spawns")
    }

    /// Origin-wide push id set as another window would read it.
    pub fn registered_ids(&self, config: &RelayConfig) -> BTreeSet<String> {
        let store = self.backends.open(config.sharing, "observer");
        let raw = store.get(&format!("{}.push_ids", config.namespace));
        if raw.is_empty() {
            return BTreeSet::new();
        }
        serde_json::from_str(&raw).expect("push id set")
    }
}

pub fn polled_config() -> RelayConfig {
    RelayConfig {
        sharing: SharingMode::Polled,
        ..RelayConfig::default()
    }
}

pub fn owners(windows: &[&Window]) -> Vec<String> {
    windows
        .iter()
        .filter(|window| *window.ownership().borrow() == OwnershipState::Owner)
        .map(|window| window.id().to_string())
        .collect()
}

pub async fn next_event<F>(events: &mut broadcast::Receiver<RelayEvent>, mut matches: F) -> RelayEvent
where
    F: FnMut(&RelayEvent) -> bool,
{
    loop {
        match events.recv().await {
            Ok(event) if matches(&event) => return event,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("event stream closed"),
        }
    }
}

/// Records `(push_id, payload)` deliveries.
#[derive(Clone, Default)]
pub struct Inbox(Arc<Mutex<Vec<(String, String)>>>);

impl Inbox {
    pub fn callback(&self) -> impl Fn(&str, &str) + Send + Sync + 'static {
        let inbox = self.0.clone();
        move |id: &str, payload: &str| inbox.lock().push((id.to_string(), payload.to_string()))
    }

    pub fn received(&self) -> Vec<(String, String)> {
        self.0.lock().clone()
    }
}

pub fn notifications_body(ids: &[&str], payload: &str) -> ListenResponse {
    let body = serde_json::json!({
        "sequence_number": 1,
        "notifications": [{ "push-ids": ids, "payload": payload }]
    });
    ListenResponse::ok(body.to_string())
}
