use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::{SlotChange, SlotResult, SlotStore, SlotWatcher, StoreKind};

const CHANGE_CHANNEL_DEPTH: usize = 256;

struct SharedInner {
    slots: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<SlotChange>,
}

/// Instantly-notifying storage for one origin. Cloning shares the same slots.
#[derive(Clone)]
pub struct SharedOrigin {
    inner: Arc<SharedInner>,
}

impl Default for SharedOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedOrigin {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SharedInner {
                slots: RwLock::new(HashMap::new()),
                changes: broadcast::channel(CHANGE_CHANNEL_DEPTH).0,
            }),
        }
    }

    /// Handle used by a single window; its own writes are not echoed back to its watcher.
    pub fn window(&self, window_id: impl Into<String>) -> SharedStorage {
        SharedStorage {
            inner: Arc::clone(&self.inner),
            window_id: window_id.into(),
        }
    }
}

pub struct SharedStorage {
    inner: Arc<SharedInner>,
    window_id: String,
}

impl SharedStorage {
    fn announce(&self, key: &str, value: Option<String>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.inner.changes.send(SlotChange {
            key: key.to_string(),
            value,
            origin: self.window_id.clone(),
        });
    }
}

impl SlotStore for SharedStorage {
    fn get(&self, key: &str) -> String {
        self.inner.slots.read().get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> SlotResult<()> {
        self.inner
            .slots
            .write()
            .insert(key.to_string(), value.to_string());
        self.announce(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) {
        let removed = self.inner.slots.write().remove(key);
        if removed.is_some() {
            self.announce(key, None);
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.slots.read().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.slots.read().keys().cloned().collect()
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Shared
    }

    fn watch(&self) -> Option<SlotWatcher> {
        Some(SlotWatcher::new(
            self.inner.changes.subscribe(),
            self.window_id.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn writes_are_visible_and_announced_to_other_windows() {
        let origin = SharedOrigin::new();
        let a = origin.window("a");
        let b = origin.window("b");
        let mut watcher = b.watch().expect("shared storage is watchable");

        a.set("owner", "a").expect("set ok");
        assert_eq!(b.get("owner"), "a");

        let change = timeout(Duration::from_secs(1), watcher.next())
            .await
            .expect("change timeout")
            .expect("origin alive");
        assert_eq!(change.key, "owner");
        assert_eq!(change.value.as_deref(), Some("a"));
        assert_eq!(change.origin, "a");
    }

    #[tokio::test]
    async fn own_writes_are_not_echoed() {
        let origin = SharedOrigin::new();
        let a = origin.window("a");
        let b = origin.window("b");
        let mut watcher = a.watch().expect("watchable");

        a.set("k", "mine").unwrap();
        b.set("k", "theirs").unwrap();

        let change = watcher.next().await.expect("change");
        assert_eq!(change.value.as_deref(), Some("theirs"));
    }

    #[test]
    fn missing_slots_read_as_empty() {
        let origin = SharedOrigin::new();
        let a = origin.window("a");
        assert_eq!(a.get("nope"), "");
        assert!(!a.exists("nope"));
        a.set("nope", "").unwrap();
        assert!(a.exists("nope"));
        a.remove("nope");
        assert!(!a.exists("nope"));
    }
}
