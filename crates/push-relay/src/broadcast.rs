//! Fan-out of server notifications from the owning window to every window of the origin.
//!
//! On instant storage the owner writes one record per notification and every other window
//! picks it up from the change event. On the bounded store there are no change events, so
//! records are appended to a buffer that every window polls; each poll removes the ids the
//! polling window acknowledged and keeps the rest for the others.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use slot_store::{SlotChange, SlotError, SlotStore, StoreKind};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::keys::SlotKeys;
use crate::protocol::Notification;
use crate::RelayResult;

/// Hands a notification to the local registry and returns the ids it delivered.
pub type Deliver<'a> = &'a mut dyn FnMut(&Notification) -> BTreeSet<String>;

const RECENT_NONCES: usize = 64;

/// One notification as stored in a slot. `nonce` tells apart records with equal content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub ids: BTreeSet<String>,
    pub payload: String,
    pub nonce: String,
}

impl NotificationRecord {
    fn new(notification: &Notification, ids: BTreeSet<String>) -> Self {
        Self {
            ids,
            payload: notification.payload.clone(),
            nonce: Uuid::new_v4().to_string(),
        }
    }

    fn notification(&self, ids: BTreeSet<String>) -> Notification {
        Notification {
            ids,
            payload: self.payload.clone(),
        }
    }
}

pub enum Broadcaster {
    Instant(InstantBroadcaster),
    Polled(PolledBroadcaster),
}

impl Broadcaster {
    /// Picks the variant that matches the backend: only the bounded store needs polling.
    pub fn for_store(kind: StoreKind, keys: &SlotKeys, config: &RelayConfig) -> Self {
        match kind {
            StoreKind::Shared | StoreKind::Local => {
                Broadcaster::Instant(InstantBroadcaster::new(keys.notification.clone()))
            }
            StoreKind::Bounded => Broadcaster::Polled(PolledBroadcaster::new(
                keys.notifications.clone(),
                config.notification_buffer_bytes,
            )),
        }
    }

    pub fn is_polled(&self) -> bool {
        matches!(self, Broadcaster::Polled(_))
    }

    /// Owner side: delivers locally, then publishes for the other windows.
    pub fn notify(
        &mut self,
        store: &dyn SlotStore,
        notification: &Notification,
        deliver: Deliver<'_>,
    ) -> RelayResult<()> {
        match self {
            Broadcaster::Instant(instant) => instant.notify(store, notification, deliver),
            Broadcaster::Polled(polled) => polled.notify(store, notification, deliver),
        }
    }

    /// Window side, instant backend.
    pub fn on_change(&mut self, change: &SlotChange, deliver: Deliver<'_>) {
        if let Broadcaster::Instant(instant) = self {
            instant.on_change(change, deliver);
        }
    }

    /// Window side, bounded backend.
    pub fn poll(&mut self, store: &dyn SlotStore, deliver: Deliver<'_>) -> RelayResult<()> {
        match self {
            Broadcaster::Instant(_) => Ok(()),
            Broadcaster::Polled(polled) => polled.poll(store, deliver),
        }
    }
}

pub struct InstantBroadcaster {
    key: String,
    recent: VecDeque<String>,
}

impl InstantBroadcaster {
    pub fn new(key: String) -> Self {
        Self {
            key,
            recent: VecDeque::with_capacity(RECENT_NONCES),
        }
    }

    fn notify(
        &mut self,
        store: &dyn SlotStore,
        notification: &Notification,
        deliver: Deliver<'_>,
    ) -> RelayResult<()> {
        deliver(notification);
        let record = NotificationRecord::new(notification, notification.ids.clone());
        self.remember(&record.nonce);
        store.set(&self.key, &serde_json::to_string(&record)?)?;
        Ok(())
    }

    fn on_change(&mut self, change: &SlotChange, deliver: Deliver<'_>) {
        if change.key != self.key {
            return;
        }
        let Some(value) = change.value.as_deref() else {
            return;
        };
        let record: NotificationRecord = match serde_json::from_str(value) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    target = "push.broadcast",
                    error = %err,
                    "ignoring malformed notification record"
                );
                return;
            }
        };
        if self.recent.contains(&record.nonce) {
            debug!(
                target = "push.broadcast",
                nonce = %record.nonce,
                "duplicate notification record skipped"
            );
            return;
        }
        self.remember(&record.nonce);
        deliver(&record.notification(record.ids.clone()));
    }

    fn remember(&mut self, nonce: &str) {
        if self.recent.len() == RECENT_NONCES {
            self.recent.pop_front();
        }
        self.recent.push_back(nonce.to_string());
    }
}

pub struct PolledBroadcaster {
    key: String,
    bound: usize,
    /// Ids this window already delivered, per record still in the buffer.
    delivered: HashMap<String, BTreeSet<String>>,
}

impl PolledBroadcaster {
    pub fn new(key: String, bound: usize) -> Self {
        Self {
            key,
            bound,
            delivered: HashMap::new(),
        }
    }

    fn notify(
        &mut self,
        store: &dyn SlotStore,
        notification: &Notification,
        deliver: Deliver<'_>,
    ) -> RelayResult<()> {
        let delivered = deliver(notification);
        let remaining: BTreeSet<String> =
            notification.ids.difference(&delivered).cloned().collect();
        if remaining.is_empty() {
            return Ok(());
        }
        let mut records = self.read(store);
        let record = NotificationRecord::new(notification, remaining);
        self.delivered.insert(record.nonce.clone(), delivered);
        records.push(record);
        self.write(store, records)
    }

    fn poll(&mut self, store: &dyn SlotStore, deliver: Deliver<'_>) -> RelayResult<()> {
        let records = self.read(store);
        if records.is_empty() {
            self.delivered.clear();
            return Ok(());
        }

        let mut changed = false;
        let mut kept = Vec::with_capacity(records.len());
        for mut record in records {
            let seen = self.delivered.entry(record.nonce.clone()).or_default();
            let fresh: BTreeSet<String> = record.ids.difference(seen).cloned().collect();
            if !fresh.is_empty() {
                seen.extend(deliver(&record.notification(fresh)));
            }
            // Ids written back by a stale rewrite are acknowledged again.
            let before = record.ids.len();
            record.ids.retain(|id| !seen.contains(id));
            changed |= record.ids.len() != before;
            if !record.ids.is_empty() {
                kept.push(record);
            }
        }
        self.delivered
            .retain(|nonce, _| kept.iter().any(|record| &record.nonce == nonce));

        if changed {
            self.write(store, kept)?;
        }
        Ok(())
    }

    fn read(&self, store: &dyn SlotStore) -> Vec<NotificationRecord> {
        let raw = store.get(&self.key);
        if raw.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    target = "push.broadcast",
                    error = %err,
                    "clearing malformed notification buffer"
                );
                store.remove(&self.key);
                Vec::new()
            }
        }
    }

    /// Writes the buffer, dropping the oldest records until it fits both the configured
    /// bound and the backend's capacity.
    fn write(&self, store: &dyn SlotStore, mut records: Vec<NotificationRecord>) -> RelayResult<()> {
        let mut dropped = 0usize;
        loop {
            if records.is_empty() {
                store.remove(&self.key);
                break;
            }
            let encoded = serde_json::to_string(&records)?;
            if encoded.len() > self.bound {
                records.remove(0);
                dropped += 1;
                continue;
            }
            match store.set(&self.key, &encoded) {
                Ok(()) => break,
                Err(SlotError::CapacityExceeded { .. }) => {
                    records.remove(0);
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            warn!(
                target = "push.broadcast",
                dropped,
                bound = self.bound,
                "notification buffer overflow; oldest records dropped"
            );
        }
        Ok(())
    }
}
