//! Escalating retry timers ("timeout bombs").
//!
//! A chain walks an ordered list of delays. Every expiry either asks for another attempt or,
//! once the list is exhausted, fires a single abort. Timers are plain tokio sleeps that post a
//! [`ChainExpired`] message back to the owning driver; the message carries the generation it
//! was scheduled under, so an expiry that was already in flight when the chain was stopped or
//! rescheduled is recognised as stale and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Which failure class a chain is recovering from. One chain per purpose is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainPurpose {
    Network,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainExpired {
    pub purpose: ChainPurpose,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    Retry { index: usize, total: usize },
    Abort,
}

pub struct RetryChain {
    purpose: ChainPurpose,
    intervals: Vec<Duration>,
    index: usize,
    generation: u64,
    active: bool,
    timer: Option<JoinHandle<()>>,
    expirations: mpsc::UnboundedSender<ChainExpired>,
}

impl RetryChain {
    pub fn new(purpose: ChainPurpose, expirations: mpsc::UnboundedSender<ChainExpired>) -> Self {
        Self {
            purpose,
            intervals: Vec::new(),
            index: 0,
            generation: 0,
            active: false,
            timer: None,
            expirations,
        }
    }

    /// Starts over from the first delay, replacing any chain already running.
    pub fn start(&mut self, intervals: Vec<Duration>) {
        self.stop();
        self.intervals = intervals;
        self.index = 0;
        self.active = true;
        self.schedule();
    }

    /// Cancels the pending timer. Safe to call repeatedly or on an idle chain.
    pub fn stop(&mut self) {
        self.active = false;
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Swaps the delay list while keeping the attempt index. A pending timer is replaced by one
    /// for the new delay at the current position.
    pub fn rebase(&mut self, intervals: Vec<Duration>) {
        self.intervals = intervals;
        if self.active {
            if let Some(timer) = self.timer.take() {
                timer.abort();
            }
            self.generation = self.generation.wrapping_add(1);
            self.schedule();
        }
    }

    /// Interprets an expiry. Returns `None` for expiries from a stopped or replaced timer.
    pub fn on_expired(&mut self, expired: ChainExpired) -> Option<ChainStep> {
        if !self.active || expired.purpose != self.purpose || expired.generation != self.generation
        {
            return None;
        }
        self.timer = None;
        self.index += 1;
        let total = self.intervals.len();
        if self.index < total {
            self.schedule();
            Some(ChainStep::Retry {
                index: self.index,
                total,
            })
        } else {
            self.active = false;
            self.generation = self.generation.wrapping_add(1);
            Some(ChainStep::Abort)
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    fn schedule(&mut self) {
        let delay = self
            .intervals
            .get(self.index)
            .copied()
            .unwrap_or(Duration::ZERO);
        let expired = ChainExpired {
            purpose: self.purpose,
            generation: self.generation,
        };
        debug!(
            target = "push.relay",
            purpose = ?self.purpose,
            index = self.index,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        let tx = self.expirations.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(expired);
        }));
    }
}

impl Drop for RetryChain {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
