//! The long-poll request loop of the owning window.
//!
//! [`LongPoll`] keeps at most one request outstanding. Responses and retry-chain expiries are
//! fed back by the window driver and turned into [`PollEffect`]s; the driver owns the request
//! contents (push ids, browser) and decides when to issue.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::events::RelayEvent;
use crate::protocol::{Heartbeat, ListenBody, ListenRequest, ServerCommand, LISTEN_OP};
use crate::retry_chain::{ChainExpired, ChainPurpose, ChainStep, RetryChain};
use crate::transport::{ListenResponse, PollTransport, TransportError};

/// Outcome of one issued request, tagged with the generation it was issued under.
#[derive(Debug)]
pub struct PollResult {
    pub generation: u64,
    pub outcome: Result<ListenResponse, TransportError>,
}

/// Why the loop stopped issuing requests on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// Empty-response retries ran out. Not an error.
    Idle,
    /// Server-error retries ran out; needs a reconfiguration or restart.
    ServerError,
    /// Network retries ran out; ownership was given up.
    Down,
    /// The server closed the connection.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEffect {
    /// Issue the next request now.
    Reissue,
    Emit(RelayEvent),
    Command(ServerCommand),
    PersistSequence(u64),
    /// Give up connection ownership.
    Abandon,
}

pub struct LongPoll {
    transport: Arc<dyn PollTransport>,
    config: RelayConfig,
    results: mpsc::UnboundedSender<PollResult>,
    in_flight: Option<JoinHandle<()>>,
    generation: u64,
    sequence: u64,
    heartbeat: Heartbeat,
    sent_ids: Option<BTreeSet<String>>,
    empty_retries_left: u32,
    failures: usize,
    last_server_error: Option<(u16, String)>,
    network: RetryChain,
    server: RetryChain,
    halt: Option<Halt>,
}

impl LongPoll {
    pub fn new(
        transport: Arc<dyn PollTransport>,
        config: RelayConfig,
        results: mpsc::UnboundedSender<PollResult>,
        expirations: mpsc::UnboundedSender<ChainExpired>,
    ) -> Self {
        Self {
            transport,
            heartbeat: Heartbeat {
                timestamp: 0,
                interval: config.heartbeat.interval,
            },
            empty_retries_left: config.response_timeout_handler.retries,
            config,
            results,
            in_flight: None,
            generation: 0,
            sequence: 0,
            sent_ids: None,
            failures: 0,
            last_server_error: None,
            network: RetryChain::new(ChainPurpose::Network, expirations.clone()),
            server: RetryChain::new(ChainPurpose::Server, expirations),
            halt: None,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    pub fn halt(&self) -> Option<Halt> {
        self.halt
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn chains_active(&self) -> bool {
        self.network.is_active() || self.server.is_active()
    }

    /// Push ids carried by the last issued request.
    pub fn sent_ids(&self) -> Option<&BTreeSet<String>> {
        self.sent_ids.as_ref()
    }

    /// Nothing outstanding and nothing scheduled: the driver may issue.
    pub fn is_ready(&self) -> bool {
        self.halt.is_none() && !self.is_in_flight() && !self.chains_active()
    }

    pub fn request(
        &self,
        window: &str,
        push_ids: &BTreeSet<String>,
        browser: Option<String>,
    ) -> ListenRequest {
        ListenRequest {
            access_token: self.config.access_token.clone(),
            browser,
            heartbeat: self.heartbeat,
            op: LISTEN_OP,
            sequence_number: self.sequence,
            window: window.to_string(),
            push_ids: push_ids.iter().cloned().collect(),
        }
    }

    /// Sends `request`, replacing any request still outstanding.
    pub fn issue(&mut self, request: ListenRequest) {
        self.abort();
        self.halt = None;
        self.sent_ids = Some(request.push_ids.iter().cloned().collect());
        let generation = self.generation;
        let timeout = self.config.request_timeout(self.heartbeat.interval);
        let transport = self.transport.clone();
        let results = self.results.clone();
        debug!(
            target = "push.relay",
            window = %request.window,
            sequence = request.sequence_number,
            ids = request.push_ids.len(),
            "long-poll issued"
        );
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = transport.listen(&request, timeout).await;
            let _ = results.send(PollResult {
                generation,
                outcome,
            });
        }));
    }

    /// Cancels the outstanding request, if any. A result already on its way is ignored.
    pub fn abort(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(request) = self.in_flight.take() {
            request.abort();
        }
    }

    pub fn stop_chains(&mut self) {
        self.network.stop();
        self.server.stop();
    }

    /// Back to a fresh loop: nothing in flight, no chains, no halt, counters refilled.
    pub fn reset(&mut self) {
        self.abort();
        self.stop_chains();
        self.halt = None;
        self.sent_ids = None;
        self.failures = 0;
        self.last_server_error = None;
        self.empty_retries_left = self.config.response_timeout_handler.retries;
    }

    /// Applies new tunables without touching the outstanding request. Running chains keep
    /// their position. A server-announced heartbeat interval survives unless the configured
    /// interval itself changed.
    pub fn reconfigure(&mut self, config: &RelayConfig) {
        if config.heartbeat.interval != self.config.heartbeat.interval {
            self.heartbeat.interval = config.heartbeat.interval;
        }
        self.config = config.clone();
        self.empty_retries_left = self
            .empty_retries_left
            .min(config.response_timeout_handler.retries);
        self.network
            .rebase(config.network_retry_intervals(self.heartbeat.interval));
        self.server.rebase(config.server_error_delays());
        if self.halt == Some(Halt::ServerError) {
            self.halt = None;
        }
    }

    pub fn on_result(&mut self, result: PollResult) -> Vec<PollEffect> {
        if result.generation != self.generation {
            return Vec::new();
        }
        self.in_flight = None;
        match result.outcome {
            Err(err) => self.on_network_failure(err),
            Ok(response) if response.close => {
                self.stop_chains();
                self.halt = Some(Halt::Closed);
                info!(
                    target = "push.relay",
                    reason = ?response.close_reason,
                    "server closed the connection"
                );
                vec![PollEffect::Emit(RelayEvent::ConnectionStopped {
                    reason: response.close_reason,
                })]
            }
            Ok(response) if !(200..300).contains(&response.status) => {
                self.on_server_failure(response)
            }
            Ok(response) => self.on_body(&response.body),
        }
    }

    pub fn on_chain_expired(&mut self, expired: ChainExpired) -> Vec<PollEffect> {
        match expired.purpose {
            ChainPurpose::Network => match self.network.on_expired(expired) {
                None => Vec::new(),
                Some(ChainStep::Retry { index, total }) => {
                    debug!(target = "push.relay", attempt = index, total, "network retry");
                    vec![PollEffect::Reissue]
                }
                Some(ChainStep::Abort) => {
                    self.abort();
                    self.halt = Some(Halt::Down);
                    warn!(
                        target = "push.relay",
                        failures = self.failures,
                        "network retries exhausted; connection down"
                    );
                    vec![
                        PollEffect::Emit(RelayEvent::ConnectionDown),
                        PollEffect::Abandon,
                    ]
                }
            },
            ChainPurpose::Server => match self.server.on_expired(expired) {
                None => Vec::new(),
                Some(ChainStep::Retry { index, total }) => {
                    debug!(target = "push.relay", attempt = index, total, "server retry");
                    vec![PollEffect::Reissue]
                }
                Some(ChainStep::Abort) => {
                    self.abort();
                    self.halt = Some(Halt::ServerError);
                    let (status, body) = self.last_server_error.take().unwrap_or_default();
                    warn!(
                        target = "push.relay",
                        status,
                        "server error retries exhausted"
                    );
                    vec![PollEffect::Emit(RelayEvent::ServerError { status, body })]
                }
            },
        }
    }

    fn on_network_failure(&mut self, err: TransportError) -> Vec<PollEffect> {
        self.server.stop();
        self.failures += 1;
        warn!(
            target = "push.relay",
            attempt = self.failures,
            error = %err,
            "long-poll request failed"
        );
        if !self.network.is_active() {
            self.network
                .start(self.config.network_retry_intervals(self.heartbeat.interval));
        }
        vec![PollEffect::Emit(RelayEvent::ConnectionTrouble {
            attempt: self.failures,
        })]
    }

    fn on_server_failure(&mut self, response: ListenResponse) -> Vec<PollEffect> {
        self.network.stop();
        self.failures = 0;
        warn!(
            target = "push.relay",
            status = response.status,
            "server answered with an error"
        );
        self.last_server_error = Some((response.status, response.body));
        if !self.server.is_active() {
            self.server.start(self.config.server_error_delays());
        }
        Vec::new()
    }

    fn on_body(&mut self, body: &str) -> Vec<PollEffect> {
        self.stop_chains();
        self.failures = 0;
        self.last_server_error = None;

        if body.trim().is_empty() {
            if self.empty_retries_left == 0 {
                self.halt = Some(Halt::Idle);
                debug!(target = "push.relay", "empty responses exhausted; idle");
                return Vec::new();
            }
            self.empty_retries_left -= 1;
            return vec![PollEffect::Reissue];
        }

        let body = match ListenBody::decode(body) {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    target = "push.relay",
                    error = %err,
                    "dropping malformed long-poll response"
                );
                return vec![PollEffect::Reissue];
            }
        };
        self.empty_retries_left = self.config.response_timeout_handler.retries;

        let mut effects = Vec::new();
        if let Some(sequence) = body.sequence_number {
            if sequence != self.sequence {
                self.sequence = sequence;
                effects.push(PollEffect::PersistSequence(sequence));
            }
        }
        if let Some(heartbeat) = body.heartbeat {
            self.heartbeat.timestamp = heartbeat.timestamp;
            if heartbeat.interval > 0 && heartbeat.interval != self.heartbeat.interval {
                debug!(
                    target = "push.relay",
                    interval = heartbeat.interval,
                    "heartbeat interval changed"
                );
                self.heartbeat.interval = heartbeat.interval;
                self.network
                    .rebase(self.config.network_retry_intervals(heartbeat.interval));
            }
        }

        let mut backing_off = false;
        for command in body.into_commands() {
            backing_off |= matches!(command, ServerCommand::BackOff(_));
            effects.push(PollEffect::Command(command));
        }
        if !backing_off {
            effects.push(PollEffect::Reissue);
        }
        effects
    }
}

impl Drop for LongPoll {
    fn drop(&mut self) {
        if let Some(request) = self.in_flight.take() {
            request.abort();
        }
    }
}
