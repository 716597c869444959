//! Expiry of push ids that no window answers for.
//!
//! The owner pings every registered id each round; windows that still hold one of them answer
//! with a confirmation. An id that stays unconfirmed for `max_unconfirmed_rounds` consecutive
//! rounds is removed from the shared set. Only the instant backend can carry the ping and its
//! answers, so the monitor is never resumed on polled storage.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// "Are you alive" request for a set of ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlivePing {
    pub round: u64,
    pub ids: BTreeSet<String>,
    pub nonce: String,
}

/// Answer from one window with the ids it still holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlivePong {
    pub round: u64,
    pub ids: BTreeSet<String>,
    pub nonce: String,
    pub window: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub expired: BTreeSet<String>,
    pub ping: Option<AlivePing>,
}

pub struct LivelinessMonitor {
    max_unconfirmed_rounds: u32,
    running: bool,
    round: u64,
    unconfirmed: HashMap<String, u32>,
    confirmed: HashSet<String>,
}

impl LivelinessMonitor {
    pub fn new(max_unconfirmed_rounds: u32) -> Self {
        Self {
            max_unconfirmed_rounds: max_unconfirmed_rounds.max(1),
            running: false,
            round: 0,
            unconfirmed: HashMap::new(),
            confirmed: HashSet::new(),
        }
    }

    pub fn set_max_unconfirmed_rounds(&mut self, rounds: u32) {
        self.max_unconfirmed_rounds = rounds.max(1);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts monitoring with fresh counters.
    pub fn resume(&mut self) {
        self.running = true;
        self.round = 0;
        self.unconfirmed.clear();
        self.confirmed.clear();
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Unconfirmed-round count of an id, if tracked.
    pub fn unconfirmed_rounds(&self, push_id: &str) -> Option<u32> {
        self.unconfirmed.get(push_id).copied()
    }

    /// Settles the previous round against `registered` and opens the next one.
    pub fn begin_round(&mut self, registered: &BTreeSet<String>, nonce: String) -> RoundOutcome {
        let mut outcome = RoundOutcome::default();
        if !self.running {
            return outcome;
        }

        self.unconfirmed.retain(|id, _| registered.contains(id));
        if self.round > 0 {
            for id in registered {
                let counter = self.unconfirmed.entry(id.clone()).or_insert(0);
                if self.confirmed.contains(id) {
                    *counter = 0;
                } else {
                    *counter += 1;
                }
                if *counter >= self.max_unconfirmed_rounds {
                    outcome.expired.insert(id.clone());
                }
            }
            for id in &outcome.expired {
                self.unconfirmed.remove(id);
            }
        }
        self.confirmed.clear();
        self.round += 1;

        let ids: BTreeSet<String> = registered.difference(&outcome.expired).cloned().collect();
        if !outcome.expired.is_empty() {
            debug!(
                target = "push.liveliness",
                round = self.round,
                expired = ?outcome.expired,
                "push ids expired"
            );
        }
        if !ids.is_empty() {
            outcome.ping = Some(AlivePing {
                round: self.round,
                ids,
                nonce,
            });
        }
        outcome
    }

    /// Marks ids as answered for the current round.
    pub fn confirm<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        if !self.running {
            return;
        }
        self.confirmed.extend(ids.into_iter().cloned());
    }
}
