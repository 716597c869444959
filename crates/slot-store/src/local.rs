use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{SlotResult, SlotStore, StoreKind};

/// Slots visible only inside the owning window.
#[derive(Debug, Default)]
pub struct LocalSlots {
    slots: RwLock<HashMap<String, String>>,
}

impl LocalSlots {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for LocalSlots {
    fn get(&self, key: &str) -> String {
        self.slots.read().get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> SlotResult<()> {
        self.slots.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.slots.write().remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }
}
