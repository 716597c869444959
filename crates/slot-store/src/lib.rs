//! Origin-scoped key/value slots shared between windows of one logical client.
//!
//! Every backend speaks the same [`SlotStore`] contract:
//! - [`SharedStorage`] is visible to every window of an origin and emits change events
//!   to the *other* windows on every write.
//! - [`BoundedStore`] is visible to every window too, but has a hard byte cap and no change
//!   events; consumers poll it.
//! - [`LocalSlots`] is private to a single window and used when sharing is switched off.
//!
//! Backends are picked once through [`SlotBackends`] and can be swapped at runtime behind a
//! [`SwitchableStore`] without losing values.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

mod bounded;
mod local;
mod shared;
mod switchable;

pub use bounded::{BoundedOrigin, BoundedStore};
pub use local::LocalSlots;
pub use shared::{SharedOrigin, SharedStorage};
pub use switchable::{SlotBackends, SwitchableStore};

/// Hard cap of the bounded backend, in bytes of keys plus values.
pub const DEFAULT_BOUNDED_CAPACITY: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot store capacity exceeded: {needed} bytes > {capacity} bytes")]
    CapacityExceeded { needed: usize, capacity: usize },
}

pub type SlotResult<T> = Result<T, SlotError>;

/// A write observed by another window through the instant backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub key: String,
    /// `None` when the slot was removed.
    pub value: Option<String>,
    /// Window that performed the write.
    pub origin: String,
}

/// Which physical backend a store handle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Shared,
    Bounded,
    Local,
}

/// Sharing mode requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Instant shared storage, falling back to the bounded store when unavailable.
    #[default]
    Shared,
    /// Always use the bounded polled store.
    Polled,
    /// No sharing; slots live only inside the current window.
    Local,
}

impl std::str::FromStr for SharingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(SharingMode::Shared),
            "polled" => Ok(SharingMode::Polled),
            "local" => Ok(SharingMode::Local),
            other => Err(format!("unknown sharing mode {other}")),
        }
    }
}

pub trait SlotStore: Send + Sync {
    /// Returns the stored value, or an empty string when the slot is absent.
    fn get(&self, key: &str) -> String;
    fn set(&self, key: &str, value: &str) -> SlotResult<()>;
    fn remove(&self, key: &str);
    fn exists(&self, key: &str) -> bool;
    fn keys(&self) -> Vec<String>;
    fn kind(&self) -> StoreKind;

    /// Byte cap of the backend, if it has one.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Change events written by other windows. `None` for backends that must be polled.
    fn watch(&self) -> Option<SlotWatcher> {
        None
    }
}

/// Receives changes made by other windows, skipping the watcher's own writes.
pub struct SlotWatcher {
    rx: broadcast::Receiver<SlotChange>,
    window_id: String,
}

impl SlotWatcher {
    pub(crate) fn new(rx: broadcast::Receiver<SlotChange>, window_id: String) -> Self {
        Self { rx, window_id }
    }

    /// Waits for the next foreign change. Returns `None` once the origin is gone.
    pub async fn next(&mut self) -> Option<SlotChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.origin == self.window_id => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target = "slot.store",
                        window = %self.window_id,
                        skipped,
                        "slot watcher lagged behind origin writes"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
