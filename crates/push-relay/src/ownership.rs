//! Lease-based election of the window that holds the long-poll connection.
//!
//! There is no lock: windows read and write the owner and lease slots on every polling tick,
//! and a transient double candidacy is resolved by whichever write survives until the next
//! read. The owner slot holds either `<window>` (candidacy) or `<window>:acquired`.

use std::time::Duration;

use rand::Rng;
use slot_store::SlotStore;
use tracing::{debug, info};

use crate::keys::SlotKeys;
use crate::RelayResult;

const ACQUIRED_SUFFIX: &str = ":acquired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipState {
    #[default]
    NoOwner,
    Candidate,
    Owner,
    NotOwner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipMarker {
    Empty,
    Candidate(String),
    Acquired(String),
}

impl OwnershipMarker {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return OwnershipMarker::Empty;
        }
        match raw.strip_suffix(ACQUIRED_SUFFIX) {
            Some(window) if !window.is_empty() => OwnershipMarker::Acquired(window.to_string()),
            _ => OwnershipMarker::Candidate(raw.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            OwnershipMarker::Empty => String::new(),
            OwnershipMarker::Candidate(window) => window.clone(),
            OwnershipMarker::Acquired(window) => format!("{window}{ACQUIRED_SUFFIX}"),
        }
    }

    fn window(&self) -> Option<&str> {
        match self {
            OwnershipMarker::Empty => None,
            OwnershipMarker::Candidate(window) | OwnershipMarker::Acquired(window) => Some(window),
        }
    }
}

/// What a tick changed, for the driver to act on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub state: OwnershipState,
    /// This window just became the acquired owner.
    pub gained: bool,
    /// This window was the owner and no longer is.
    pub lost: bool,
    /// The acquired owner differs from the one seen before.
    pub reestablished: Option<String>,
    /// The lease has expired; write a candidacy after this delay.
    pub candidacy_after: Option<Duration>,
}

pub struct Election {
    window_id: String,
    owner_key: String,
    lease_key: String,
    polling_period: Duration,
    state: OwnershipState,
    last_acquired: Option<String>,
    candidacy_pending: bool,
}

impl Election {
    pub fn new(window_id: impl Into<String>, keys: &SlotKeys, polling_period: Duration) -> Self {
        Self {
            window_id: window_id.into(),
            owner_key: keys.owner.clone(),
            lease_key: keys.lease.clone(),
            polling_period,
            state: OwnershipState::NoOwner,
            last_acquired: None,
            candidacy_pending: false,
        }
    }

    pub fn state(&self) -> OwnershipState {
        self.state
    }

    pub fn is_owner(&self) -> bool {
        self.state == OwnershipState::Owner
    }

    pub fn set_polling_period(&mut self, polling_period: Duration) {
        self.polling_period = polling_period;
    }

    pub fn lease_duration(&self) -> Duration {
        self.polling_period * 3
    }

    /// One polling tick: read the slots, advance the state machine, renew the lease.
    pub fn tick<R: Rng>(
        &mut self,
        store: &dyn SlotStore,
        now_ms: u64,
        rng: &mut R,
    ) -> RelayResult<TickOutcome> {
        let was_owner = self.is_owner();
        let marker = OwnershipMarker::parse(&store.get(&self.owner_key));
        let mut outcome = TickOutcome::default();

        let acquired_now = match &marker {
            OwnershipMarker::Empty => {
                self.write_candidacy(store, now_ms)?;
                None
            }
            OwnershipMarker::Candidate(window) if *window == self.window_id => {
                store.set(
                    &self.owner_key,
                    &OwnershipMarker::Acquired(self.window_id.clone()).encode(),
                )?;
                self.write_lease(store, now_ms)?;
                self.state = OwnershipState::Owner;
                Some(self.window_id.clone())
            }
            OwnershipMarker::Acquired(window) if *window == self.window_id => {
                self.write_lease(store, now_ms)?;
                self.state = OwnershipState::Owner;
                Some(self.window_id.clone())
            }
            other => {
                self.state = OwnershipState::NotOwner;
                if self.lease_expired(store, now_ms) && !self.candidacy_pending {
                    self.candidacy_pending = true;
                    let max_ms = (self.polling_period.as_millis() as u64 * 3) / 2;
                    outcome.candidacy_after = Some(Duration::from_millis(rng.gen_range(0..=max_ms)));
                    debug!(
                        target = "push.ownership",
                        window = %self.window_id,
                        holder = ?other.window(),
                        "lease expired; candidacy scheduled"
                    );
                }
                match other {
                    OwnershipMarker::Acquired(window) => Some(window.clone()),
                    _ => None,
                }
            }
        };

        if matches!(marker, OwnershipMarker::Empty) {
            self.last_acquired = None;
        }
        if let Some(owner) = acquired_now {
            if self.last_acquired.as_deref() != Some(owner.as_str()) {
                info!(
                    target = "push.ownership",
                    window = %self.window_id,
                    owner = %owner,
                    "connection owner changed"
                );
                self.last_acquired = Some(owner.clone());
                outcome.reestablished = Some(owner);
            }
        }

        outcome.state = self.state;
        outcome.gained = !was_owner && self.is_owner();
        outcome.lost = was_owner && !self.is_owner();
        Ok(outcome)
    }

    /// Writes the delayed candidacy scheduled by [`Election::tick`], unless someone renewed or
    /// claimed the lease in the meantime. Returns whether the candidacy was written.
    pub fn commit_candidacy(&mut self, store: &dyn SlotStore, now_ms: u64) -> RelayResult<bool> {
        if !self.candidacy_pending {
            return Ok(false);
        }
        self.candidacy_pending = false;
        let marker = OwnershipMarker::parse(&store.get(&self.owner_key));
        if marker.window() == Some(self.window_id.as_str()) {
            return Ok(false);
        }
        if !matches!(marker, OwnershipMarker::Empty) && !self.lease_expired(store, now_ms) {
            return Ok(false);
        }
        self.write_candidacy(store, now_ms)?;
        Ok(true)
    }

    /// Drops a scheduled candidacy without writing it.
    pub fn cancel_candidacy(&mut self) {
        self.candidacy_pending = false;
    }

    /// Stops acting on ownership without touching the slots. The lease lapses on its own
    /// unless the next tick finds it still naming this window.
    pub fn step_down(&mut self) {
        self.candidacy_pending = false;
        if self.state != OwnershipState::NoOwner {
            self.state = OwnershipState::NotOwner;
        }
    }

    /// Gives ownership up, clearing the slots if they still name this window.
    pub fn release(&mut self, store: &dyn SlotStore) {
        let marker = OwnershipMarker::parse(&store.get(&self.owner_key));
        if marker.window() == Some(self.window_id.as_str()) {
            store.remove(&self.owner_key);
            store.remove(&self.lease_key);
            info!(
                target = "push.ownership",
                window = %self.window_id,
                "connection ownership released"
            );
        }
        self.candidacy_pending = false;
        self.state = OwnershipState::NotOwner;
    }

    fn write_candidacy(&mut self, store: &dyn SlotStore, now_ms: u64) -> RelayResult<()> {
        store.set(&self.owner_key, &self.window_id)?;
        // The lease keeps other windows from contesting while the candidacy settles.
        self.write_lease(store, now_ms)?;
        self.state = OwnershipState::Candidate;
        debug!(
            target = "push.ownership",
            window = %self.window_id,
            "candidacy written"
        );
        Ok(())
    }

    fn write_lease(&self, store: &dyn SlotStore, now_ms: u64) -> RelayResult<()> {
        let expires = now_ms + self.lease_duration().as_millis() as u64;
        store.set(&self.lease_key, &expires.to_string())?;
        Ok(())
    }

    fn lease_expired(&self, store: &dyn SlotStore, now_ms: u64) -> bool {
        let lease = store.get(&self.lease_key).trim().parse::<u64>().unwrap_or(0);
        now_ms > lease
    }
}
