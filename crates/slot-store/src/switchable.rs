use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    BoundedOrigin, LocalSlots, SharedOrigin, SharingMode, SlotResult, SlotStore, SlotWatcher,
    StoreKind,
};

/// Picks the backend for a sharing mode. This is the only place that knows which storage
/// technologies exist.
#[derive(Clone)]
pub struct SlotBackends {
    shared: Option<SharedOrigin>,
    bounded: BoundedOrigin,
}

impl SlotBackends {
    pub fn new(shared: Option<SharedOrigin>, bounded: BoundedOrigin) -> Self {
        Self { shared, bounded }
    }

    /// Both shared backends available, backed by process memory.
    pub fn in_process(bounded_capacity: usize) -> Self {
        Self::new(Some(SharedOrigin::new()), BoundedOrigin::new(bounded_capacity))
    }

    pub fn open(&self, mode: SharingMode, window_id: &str) -> Arc<dyn SlotStore> {
        match (mode, &self.shared) {
            (SharingMode::Shared, Some(shared)) => Arc::new(shared.window(window_id)),
            (SharingMode::Shared, None) => {
                debug!(
                    target = "slot.store",
                    window = %window_id,
                    "instant storage unavailable; using bounded store"
                );
                Arc::new(self.bounded.window())
            }
            (SharingMode::Polled, _) => Arc::new(self.bounded.window()),
            (SharingMode::Local, _) => Arc::new(LocalSlots::new()),
        }
    }
}

/// A store whose backend can be replaced while keeping every value it holds.
pub struct SwitchableStore {
    current: RwLock<Arc<dyn SlotStore>>,
}

impl SwitchableStore {
    pub fn new(initial: Arc<dyn SlotStore>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Copies every value into `next` and makes it the active backend. Values that do not
    /// fit the new backend are dropped with a warning; the switch still happens.
    pub fn switch_to(&self, next: Arc<dyn SlotStore>) {
        let mut current = self.current.write();
        for key in current.keys() {
            let value = current.get(&key);
            if let Err(err) = next.set(&key, &value) {
                warn!(
                    target = "slot.store",
                    key = %key,
                    error = %err,
                    "value lost while switching slot backend"
                );
            }
        }
        debug!(
            target = "slot.store",
            from = ?current.kind(),
            to = ?next.kind(),
            "slot backend switched"
        );
        *current = next;
    }
}

impl SlotStore for SwitchableStore {
    fn get(&self, key: &str) -> String {
        self.current.read().get(key)
    }

    fn set(&self, key: &str, value: &str) -> SlotResult<()> {
        self.current.read().set(key, value)
    }

    fn remove(&self, key: &str) {
        self.current.read().remove(key)
    }

    fn exists(&self, key: &str) -> bool {
        self.current.read().exists(key)
    }

    fn keys(&self) -> Vec<String> {
        self.current.read().keys()
    }

    fn kind(&self) -> StoreKind {
        self.current.read().kind()
    }

    fn capacity(&self) -> Option<usize> {
        self.current.read().capacity()
    }

    fn watch(&self) -> Option<SlotWatcher> {
        self.current.read().watch()
    }
}
