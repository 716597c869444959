use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{SlotError, SlotResult, SlotStore, StoreKind, DEFAULT_BOUNDED_CAPACITY};

struct BoundedInner {
    slots: Mutex<HashMap<String, String>>,
    capacity: usize,
}

/// Size-capped storage shared by every window of an origin. Nothing is announced on write,
/// readers have to poll.
#[derive(Clone)]
pub struct BoundedOrigin {
    inner: Arc<BoundedInner>,
}

impl Default for BoundedOrigin {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDED_CAPACITY)
    }
}

impl BoundedOrigin {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BoundedInner {
                slots: Mutex::new(HashMap::new()),
                capacity,
            }),
        }
    }

    pub fn window(&self) -> BoundedStore {
        BoundedStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct BoundedStore {
    inner: Arc<BoundedInner>,
}

fn footprint(slots: &HashMap<String, String>) -> usize {
    slots.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl SlotStore for BoundedStore {
    fn get(&self, key: &str) -> String {
        self.inner.slots.lock().get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> SlotResult<()> {
        let mut slots = self.inner.slots.lock();
        let current = slots.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let needed = footprint(&slots) - current + key.len() + value.len();
        if needed > self.inner.capacity {
            return Err(SlotError::CapacityExceeded {
                needed,
                capacity: self.inner.capacity,
            });
        }
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.inner.slots.lock().remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.slots.lock().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.slots.lock().keys().cloned().collect()
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Bounded
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.inner.capacity)
    }
}
