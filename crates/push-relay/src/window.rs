//! One window: the driver task that owns every piece of per-window state, and the handle the
//! embedding layer talks to.
//!
//! The driver reacts, one at a time, to handle commands, the polling tick, long-poll results,
//! retry-chain expiries, slot changes from other windows and the broadcast/liveliness ticks.
//! Nothing else touches its state, so no locking is needed beyond the slot store itself.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use slot_store::{SlotBackends, SlotChange, SlotStore, SlotWatcher, StoreKind, SwitchableStore};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::connection::{Halt, LongPoll, PollEffect, PollResult};
use crate::events::RelayEvent;
use crate::keys::SlotKeys;
use crate::liveliness::{AlivePing, AlivePong, LivelinessMonitor};
use crate::ownership::{Election, OwnershipState};
use crate::protocol::ServerCommand;
use crate::registry::{
    add_push_id, read_push_ids, remove_push_ids, LocalRegistry, PushCallback, RegistrationId,
};
use crate::retry_chain::ChainExpired;
use crate::transport::PollTransport;
use crate::{RelayError, RelayResult};

const EVENT_CAPACITY: usize = 64;

pub struct WindowBuilder {
    config: RelayConfig,
    backends: SlotBackends,
    transport: Arc<dyn PollTransport>,
    clock: Option<Clock>,
    window_id: Option<String>,
}

impl WindowBuilder {
    pub fn new(
        config: RelayConfig,
        backends: SlotBackends,
        transport: Arc<dyn PollTransport>,
    ) -> Self {
        Self {
            config,
            backends,
            transport,
            clock: None,
            window_id: None,
        }
    }

    /// Clock used for lease timestamps. Windows of one origin should share it.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn window_id(mut self, window_id: impl Into<String>) -> Self {
        self.window_id = Some(window_id.into());
        self
    }

    /// Starts the driver task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> RelayResult<Window> {
        let config = self.config.validated()?;
        let id = self
            .window_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let keys = SlotKeys::new(&config.namespace);
        let store = SwitchableStore::new(self.backends.open(config.sharing, &id));
        let watcher = store.watch();
        let broadcaster = Broadcaster::for_store(store.kind(), &keys, &config);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (expirations_tx, expirations_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ownership_tx, ownership_rx) = watch::channel(OwnershipState::NoOwner);

        info!(
            target = "push.relay",
            window = %id,
            sharing = ?config.sharing,
            backend = ?store.kind(),
            "window started"
        );

        let driver = Driver {
            election: Election::new(id.clone(), &keys, config.polling_period()),
            poll: LongPoll::new(self.transport, config.clone(), results_tx, expirations_tx),
            liveliness: LivelinessMonitor::new(config.liveliness.max_unconfirmed_rounds),
            polling: ticker(config.polling_period()),
            broadcast_poll: ticker(config.broadcast_poll_interval()),
            liveliness_tick: ticker(config.liveliness_interval()),
            id: id.clone(),
            keys,
            backends: self.backends,
            store,
            watcher,
            broadcaster,
            registry: LocalRegistry::new(),
            clock: self.clock.unwrap_or_default(),
            rng: StdRng::from_entropy(),
            browser: None,
            ping_nonce: None,
            running: true,
            events: events.clone(),
            ownership: ownership_tx,
            commands: commands_rx,
            results: results_rx,
            expirations: expirations_rx,
            candidacy_at: None,
            resume_at: None,
            config,
        };
        let task = tokio::spawn(driver.run());

        Ok(Window {
            id,
            commands: commands_tx,
            events,
            ownership: ownership_rx,
            task: Mutex::new(Some(task)),
        })
    }
}

enum Command {
    Register {
        push_id: String,
        callback: PushCallback,
        reply: oneshot::Sender<RelayResult<RegistrationId>>,
    },
    Unregister {
        push_id: String,
        registration: RegistrationId,
    },
    Pause,
    Resume,
    Reconfigure {
        config: RelayConfig,
        reply: oneshot::Sender<RelayResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running window.
pub struct Window {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RelayEvent>,
    ownership: watch::Receiver<OwnershipState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Window {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registers `push_id` in this window and in the origin-wide set. The callback receives
    /// `(push_id, payload)` for every notification addressed to it. Dropping the returned
    /// registration removes the id again once no other registration of it is left.
    pub async fn register<F>(
        &self,
        push_id: impl Into<String>,
        callback: F,
    ) -> RelayResult<PushRegistration>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let push_id = push_id.into();
        let (reply, done) = oneshot::channel();
        self.send(Command::Register {
            push_id: push_id.clone(),
            callback: Arc::new(callback),
            reply,
        })?;
        let registration = done.await.map_err(|_| RelayError::Closed)??;
        Ok(PushRegistration {
            push_id,
            registration,
            commands: self.commands.clone(),
        })
    }

    pub fn pause(&self) -> RelayResult<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> RelayResult<()> {
        self.send(Command::Resume)
    }

    /// Applies a new configuration. Changing `sharing` moves the window to another backend.
    pub async fn reconfigure(&self, config: RelayConfig) -> RelayResult<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Reconfigure { config, reply })?;
        done.await.map_err(|_| RelayError::Closed)?
    }

    /// Stops the window, giving up ownership and its push ids. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Kills the driver without any cleanup, leaving its slots behind as a crashed window
    /// would.
    pub fn abort(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub fn ownership(&self) -> watch::Receiver<OwnershipState> {
        self.ownership.clone()
    }

    fn send(&self, command: Command) -> RelayResult<()> {
        self.commands.send(command).map_err(|_| RelayError::Closed)
    }
}

/// Keeps a push id registered until disposed or dropped.
pub struct PushRegistration {
    push_id: String,
    registration: RegistrationId,
    commands: mpsc::UnboundedSender<Command>,
}

impl PushRegistration {
    pub fn push_id(&self) -> &str {
        &self.push_id
    }

    pub fn dispose(self) {}
}

impl Drop for PushRegistration {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unregister {
            push_id: std::mem::take(&mut self.push_id),
            registration: self.registration,
        });
    }
}

struct Driver {
    id: String,
    config: RelayConfig,
    keys: SlotKeys,
    backends: SlotBackends,
    store: SwitchableStore,
    watcher: Option<SlotWatcher>,
    clock: Clock,
    rng: StdRng,
    election: Election,
    poll: LongPoll,
    broadcaster: Broadcaster,
    liveliness: LivelinessMonitor,
    registry: LocalRegistry,
    browser: Option<String>,
    ping_nonce: Option<String>,
    running: bool,
    events: broadcast::Sender<RelayEvent>,
    ownership: watch::Sender<OwnershipState>,
    commands: mpsc::UnboundedReceiver<Command>,
    results: mpsc::UnboundedReceiver<PollResult>,
    expirations: mpsc::UnboundedReceiver<ChainExpired>,
    polling: Interval,
    broadcast_poll: Interval,
    liveliness_tick: Interval,
    candidacy_at: Option<Instant>,
    resume_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.on_command(command),
                        None => {
                            self.shutdown();
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                _ = self.polling.tick(), if self.running => self.on_tick(),
                Some(result) = self.results.recv() => {
                    let effects = self.poll.on_result(result);
                    self.apply(effects);
                }
                Some(expired) = self.expirations.recv() => {
                    let effects = self.poll.on_chain_expired(expired);
                    self.apply(effects);
                }
                change = next_change(&mut self.watcher) => match change {
                    Some(change) => self.on_change(change),
                    None => self.watcher = None,
                },
                _ = self.broadcast_poll.tick(), if self.running && self.broadcaster.is_polled() => {
                    self.poll_broadcast();
                }
                _ = self.liveliness_tick.tick(), if self.running && self.liveliness.is_running() => {
                    self.liveliness_round();
                }
                _ = sleep_until_opt(self.candidacy_at) => {
                    self.candidacy_at = None;
                    self.commit_candidacy();
                }
                _ = sleep_until_opt(self.resume_at) => {
                    self.resume_at = None;
                    self.resume();
                }
            }
        }
        debug!(target = "push.relay", window = %self.id, "window driver exited");
    }

    fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Register {
                push_id,
                callback,
                reply,
            } => {
                let _ = reply.send(self.register(push_id, callback));
            }
            Command::Unregister {
                push_id,
                registration,
            } => self.unregister(&push_id, registration),
            Command::Pause => {
                self.resume_at = None;
                self.pause();
            }
            Command::Resume => self.resume(),
            Command::Reconfigure { config, reply } => {
                let result = if config.namespace != self.config.namespace {
                    Err(RelayError::Config(
                        "namespace cannot change on a running window".into(),
                    ))
                } else {
                    config.validated().map(|config| self.apply_config(config))
                };
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn register(
        &mut self,
        push_id: String,
        callback: PushCallback,
    ) -> RelayResult<RegistrationId> {
        add_push_id(&self.store, &self.keys.push_ids, &push_id)?;
        debug!(target = "push.relay", window = %self.id, push_id = %push_id, "push id registered");
        Ok(self.registry.register(push_id, callback))
    }

    fn unregister(&mut self, push_id: &str, registration: RegistrationId) {
        if !self.registry.unregister(push_id, registration) {
            return;
        }
        let ids = [push_id.to_string()];
        if let Err(err) = remove_push_ids(&self.store, &self.keys.push_ids, &ids) {
            warn!(
                target = "push.relay",
                window = %self.id,
                error = %err,
                "failed to remove push id"
            );
        }
    }

    fn on_tick(&mut self) {
        let now = self.clock.now_ms();
        let outcome = match self.election.tick(&self.store, now, &mut self.rng) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    target = "push.ownership",
                    window = %self.id,
                    error = %err,
                    "ownership tick failed"
                );
                return;
            }
        };
        self.publish_ownership();

        if let Some(delay) = outcome.candidacy_after {
            self.candidacy_at = Some(Instant::now() + delay);
        }
        if outcome.lost {
            self.poll.reset();
        }
        if outcome.gained {
            self.poll.reset();
            self.load_owner_state();
        }
        if let Some(owner) = outcome.reestablished {
            self.emit(RelayEvent::ConnectionReestablished { owner });
        }
        self.update_liveliness();

        if self.election.is_owner() {
            self.drive_connection();
        }
    }

    /// Issues a request when the loop is ready, or reconnects when the registered ids moved
    /// away from those last sent.
    fn drive_connection(&mut self) {
        let ids = read_push_ids(&self.store, &self.keys.push_ids);
        if ids.is_empty() {
            self.poll.abort();
            return;
        }
        let changed = self.poll.sent_ids().is_some_and(|sent| *sent != ids);
        match self.poll.halt() {
            Some(Halt::ServerError | Halt::Down | Halt::Closed) => return,
            Some(Halt::Idle) if !changed => return,
            _ => {}
        }
        if changed {
            info!(
                target = "push.relay",
                window = %self.id,
                ids = ids.len(),
                "push ids changed; reconnecting"
            );
            self.issue(&ids);
        } else if self.poll.is_ready() {
            self.issue(&ids);
        }
    }

    fn issue(&mut self, ids: &BTreeSet<String>) {
        let request = self.poll.request(&self.id, ids, self.browser.clone());
        self.poll.issue(request);
    }

    fn apply(&mut self, effects: Vec<PollEffect>) {
        for effect in effects {
            match effect {
                PollEffect::Reissue => {
                    if !self.running || !self.election.is_owner() {
                        continue;
                    }
                    let ids = read_push_ids(&self.store, &self.keys.push_ids);
                    if !ids.is_empty() {
                        self.issue(&ids);
                    }
                }
                PollEffect::Emit(event) => self.emit(event),
                PollEffect::Command(command) => self.dispatch(command),
                PollEffect::PersistSequence(sequence) => {
                    if let Err(err) = self.store.set(&self.keys.sequence, &sequence.to_string()) {
                        warn!(
                            target = "push.relay",
                            window = %self.id,
                            error = %err,
                            "failed to persist sequence number"
                        );
                    }
                }
                PollEffect::Abandon => {
                    self.election.release(&self.store);
                    self.publish_ownership();
                    self.update_liveliness();
                }
            }
        }
    }

    fn dispatch(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Noop => {
                debug!(target = "push.relay", window = %self.id, "noop");
            }
            ServerCommand::Notifications(notifications) => {
                for notification in notifications {
                    let registry = &self.registry;
                    if let Err(err) =
                        self.broadcaster
                            .notify(&self.store, &notification, &mut |n| registry.deliver(n))
                    {
                        warn!(
                            target = "push.broadcast",
                            window = %self.id,
                            error = %err,
                            "failed to broadcast notification"
                        );
                    }
                }
            }
            ServerCommand::Configuration(update) => {
                let mut next = self.config.clone();
                match next.merge_server_configuration(&update) {
                    Ok(true) => {
                        next.namespace = self.config.namespace.clone();
                        info!(target = "push.relay", window = %self.id, "server configuration applied");
                        self.apply_config(next);
                    }
                    Ok(false) => {}
                    Err(err) => warn!(
                        target = "push.relay",
                        window = %self.id,
                        error = %err,
                        "rejected server configuration"
                    ),
                }
            }
            ServerCommand::Browser(browser) => {
                if let Err(err) = self.store.set(&self.keys.browser, &browser) {
                    warn!(
                        target = "push.relay",
                        window = %self.id,
                        error = %err,
                        "failed to store browser id"
                    );
                }
                self.browser = Some(browser);
            }
            ServerCommand::BackOff(delay) => {
                info!(
                    target = "push.relay",
                    window = %self.id,
                    delay_ms = delay.as_millis() as u64,
                    "server asked to back off"
                );
                self.pause();
                self.resume_at = Some(Instant::now() + delay);
            }
        }
    }

    fn apply_config(&mut self, config: RelayConfig) {
        let previous = std::mem::replace(&mut self.config, config);
        let config = &self.config;

        if config.polling_period_ms != previous.polling_period_ms {
            self.election.set_polling_period(config.polling_period());
            self.polling = ticker(config.polling_period());
        }
        if config.broadcast_poll_interval_ms != previous.broadcast_poll_interval_ms {
            self.broadcast_poll = ticker(config.broadcast_poll_interval());
        }
        if config.liveliness.interval_ms != previous.liveliness.interval_ms {
            self.liveliness_tick = ticker(config.liveliness_interval());
        }
        self.liveliness
            .set_max_unconfirmed_rounds(config.liveliness.max_unconfirmed_rounds);
        self.poll.reconfigure(config);

        if config.sharing != previous.sharing {
            let next = self.backends.open(config.sharing, &self.id);
            self.store.switch_to(next);
            self.watcher = self.store.watch();
            info!(
                target = "push.relay",
                window = %self.id,
                sharing = ?config.sharing,
                backend = ?self.store.kind(),
                "slot backend switched"
            );
        }
        if config.sharing != previous.sharing
            || config.notification_buffer_bytes != previous.notification_buffer_bytes
        {
            self.broadcaster = Broadcaster::for_store(self.store.kind(), &self.keys, &self.config);
        }
        self.update_liveliness();
    }

    fn on_change(&mut self, change: SlotChange) {
        if change.key == self.keys.notification {
            let registry = &self.registry;
            self.broadcaster
                .on_change(&change, &mut |n| registry.deliver(n));
        } else if change.key == self.keys.alive_ping {
            if let Some(value) = change.value.as_deref() {
                self.answer_ping(value);
            }
        } else if change.key == self.keys.alive_pong {
            if let Some(value) = change.value.as_deref() {
                self.collect_pong(value);
            }
        }
    }

    fn poll_broadcast(&mut self) {
        let registry = &self.registry;
        if let Err(err) = self
            .broadcaster
            .poll(&self.store, &mut |n| registry.deliver(n))
        {
            warn!(
                target = "push.broadcast",
                window = %self.id,
                error = %err,
                "notification buffer poll failed"
            );
        }
    }

    /// Runs the monitor exactly while this window owns the connection on instant storage.
    fn update_liveliness(&mut self) {
        let wanted = self.running
            && self.election.is_owner()
            && self.store.kind() == StoreKind::Shared;
        if wanted && !self.liveliness.is_running() {
            self.liveliness.resume();
            self.liveliness_tick = ticker(self.config.liveliness_interval());
            debug!(target = "push.liveliness", window = %self.id, "liveliness monitor resumed");
        } else if !wanted && self.liveliness.is_running() {
            self.liveliness.stop();
            self.ping_nonce = None;
            debug!(target = "push.liveliness", window = %self.id, "liveliness monitor stopped");
        }
    }

    fn liveliness_round(&mut self) {
        let registered = read_push_ids(&self.store, &self.keys.push_ids);
        let outcome = self
            .liveliness
            .begin_round(&registered, Uuid::new_v4().to_string());

        if !outcome.expired.is_empty() {
            info!(
                target = "push.liveliness",
                window = %self.id,
                expired = ?outcome.expired,
                "removing unanswered push ids"
            );
            if let Err(err) = remove_push_ids(&self.store, &self.keys.push_ids, &outcome.expired) {
                warn!(
                    target = "push.liveliness",
                    window = %self.id,
                    error = %err,
                    "failed to remove expired push ids"
                );
            }
        }

        let Some(ping) = outcome.ping else {
            self.ping_nonce = None;
            return;
        };
        let own: BTreeSet<String> = ping
            .ids
            .iter()
            .filter(|id| self.registry.holds(id))
            .cloned()
            .collect();
        self.liveliness.confirm(&own);
        self.ping_nonce = Some(ping.nonce.clone());
        let written = serde_json::to_string(&ping)
            .map_err(RelayError::from)
            .and_then(|encoded| Ok(self.store.set(&self.keys.alive_ping, &encoded)?));
        if let Err(err) = written {
            warn!(
                target = "push.liveliness",
                window = %self.id,
                error = %err,
                "failed to publish liveliness ping"
            );
        }
    }

    fn answer_ping(&mut self, value: &str) {
        let ping: AlivePing = match serde_json::from_str(value) {
            Ok(ping) => ping,
            Err(err) => {
                warn!(target = "push.liveliness", error = %err, "ignoring malformed ping");
                return;
            }
        };
        let held: BTreeSet<String> = ping
            .ids
            .iter()
            .filter(|id| self.registry.holds(id))
            .cloned()
            .collect();
        if held.is_empty() {
            return;
        }
        let pong = AlivePong {
            round: ping.round,
            ids: held,
            nonce: ping.nonce,
            window: self.id.clone(),
        };
        let written = serde_json::to_string(&pong)
            .map_err(RelayError::from)
            .and_then(|encoded| Ok(self.store.set(&self.keys.alive_pong, &encoded)?));
        if let Err(err) = written {
            warn!(
                target = "push.liveliness",
                window = %self.id,
                error = %err,
                "failed to answer liveliness ping"
            );
        }
    }

    fn collect_pong(&mut self, value: &str) {
        let Ok(pong) = serde_json::from_str::<AlivePong>(value) else {
            warn!(target = "push.liveliness", "ignoring malformed pong");
            return;
        };
        if self.ping_nonce.as_deref() != Some(pong.nonce.as_str()) {
            return;
        }
        debug!(
            target = "push.liveliness",
            from = %pong.window,
            ids = pong.ids.len(),
            "liveliness confirmed"
        );
        self.liveliness.confirm(&pong.ids);
    }

    fn commit_candidacy(&mut self) {
        if !self.running {
            self.election.cancel_candidacy();
            return;
        }
        let now = self.clock.now_ms();
        match self.election.commit_candidacy(&self.store, now) {
            Ok(_) => self.publish_ownership(),
            Err(err) => warn!(
                target = "push.ownership",
                window = %self.id,
                error = %err,
                "failed to write candidacy"
            ),
        }
    }

    /// Picks up what the previous owner left in the slots.
    fn load_owner_state(&mut self) {
        let sequence = self.store.get(&self.keys.sequence);
        if let Ok(sequence) = sequence.trim().parse::<u64>() {
            self.poll.set_sequence(sequence);
        }
        let browser = self.store.get(&self.keys.browser);
        if !browser.is_empty() {
            self.browser = Some(browser);
        }
    }

    fn pause(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.poll.reset();
        self.election.step_down();
        self.candidacy_at = None;
        self.publish_ownership();
        self.update_liveliness();
        info!(target = "push.relay", window = %self.id, "window paused");
        self.emit(RelayEvent::Stopped);
    }

    fn resume(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.resume_at = None;
        self.poll.reset();
        self.load_owner_state();
        self.polling = ticker(self.config.polling_period());
        info!(target = "push.relay", window = %self.id, "window resumed");
    }

    fn shutdown(&mut self) {
        let was_running = self.running;
        self.pause();
        self.resume_at = None;
        self.election.release(&self.store);
        self.publish_ownership();
        let held = self.registry.ids();
        if let Err(err) = remove_push_ids(&self.store, &self.keys.push_ids, &held) {
            warn!(
                target = "push.relay",
                window = %self.id,
                error = %err,
                "failed to remove push ids on shutdown"
            );
        }
        if !was_running {
            self.emit(RelayEvent::Stopped);
        }
        info!(target = "push.relay", window = %self.id, "window shut down");
    }

    fn publish_ownership(&self) {
        let state = self.election.state();
        self.ownership.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn emit(&self, event: RelayEvent) {
        debug!(target = "push.relay", window = %self.id, event = ?event, "event");
        let _ = self.events.send(event);
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_change(watcher: &mut Option<SlotWatcher>) -> Option<SlotChange> {
    match watcher {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
