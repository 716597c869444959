use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use slot_store::SlotStore;
use tracing::warn;

use crate::protocol::Notification;
use crate::RelayResult;

/// Invoked with `(push_id, payload)` for every delivered notification.
pub type PushCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Tells apart several registrations of the same push id.
pub type RegistrationId = u64;

/// Push ids registered by this window and their callbacks. An id stays held until its last
/// registration is gone.
#[derive(Default)]
pub struct LocalRegistry {
    callbacks: HashMap<String, Vec<(RegistrationId, PushCallback)>>,
    next_registration: RegistrationId,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, push_id: String, callback: PushCallback) -> RegistrationId {
        let registration = self.next_registration;
        self.next_registration += 1;
        self.callbacks
            .entry(push_id)
            .or_default()
            .push((registration, callback));
        registration
    }

    /// Drops one registration. Returns true when it was the last one for `push_id`.
    pub fn unregister(&mut self, push_id: &str, registration: RegistrationId) -> bool {
        let Some(entries) = self.callbacks.get_mut(push_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != registration);
        if entries.len() == before || !entries.is_empty() {
            return false;
        }
        self.callbacks.remove(push_id);
        true
    }

    pub fn holds(&self, push_id: &str) -> bool {
        self.callbacks.contains_key(push_id)
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.callbacks.keys().cloned().collect()
    }

    /// Calls the callback of every id this window holds, once per id. Returns those ids.
    pub fn deliver(&self, notification: &Notification) -> BTreeSet<String> {
        let mut delivered = BTreeSet::new();
        for id in &notification.ids {
            if let Some(entries) = self.callbacks.get(id) {
                for (_, callback) in entries {
                    callback(id, &notification.payload);
                }
                delivered.insert(id.clone());
            }
        }
        delivered
    }
}

/// Reads the origin-wide set of registered push ids.
pub fn read_push_ids(store: &dyn SlotStore, key: &str) -> BTreeSet<String> {
    let raw = store.get(key);
    if raw.trim().is_empty() {
        return BTreeSet::new();
    }
    match serde_json::from_str(&raw) {
        Ok(ids) => ids,
        Err(err) => {
            warn!(
                target = "push.relay",
                error = %err,
                "discarding malformed push id set"
            );
            BTreeSet::new()
        }
    }
}

pub fn add_push_id(store: &dyn SlotStore, key: &str, push_id: &str) -> RelayResult<()> {
    let mut ids = read_push_ids(store, key);
    if ids.insert(push_id.to_string()) {
        write_push_ids(store, key, &ids)?;
    }
    Ok(())
}

pub fn remove_push_ids<'a, I>(store: &dyn SlotStore, key: &str, push_ids: I) -> RelayResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut ids = read_push_ids(store, key);
    let before = ids.len();
    for id in push_ids {
        ids.remove(id);
    }
    if ids.len() != before {
        write_push_ids(store, key, &ids)?;
    }
    Ok(())
}

fn write_push_ids(store: &dyn SlotStore, key: &str, ids: &BTreeSet<String>) -> RelayResult<()> {
    if ids.is_empty() {
        store.remove(key);
    } else {
        store.set(key, &serde_json::to_string(ids)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use slot_store::LocalSlots;

    #[test]
    fn delivers_once_per_held_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = LocalRegistry::new();
        let mut registrations = Vec::new();
        for id in ["a", "b"] {
            let seen = seen.clone();
            let registration = registry.register(
                id.to_string(),
                Arc::new(move |id: &str, payload: &str| {
                    seen.lock().push(format!("{id}:{payload}"))
                }),
            );
            registrations.push(registration);
        }

        let delivered = registry.deliver(&Notification {
            ids: ["a", "b", "c"].iter().map(|s| s.to_string()).collect(),
            payload: "x".into(),
        });
        assert_eq!(
            delivered,
            ["a", "b"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
        );
        assert_eq!(seen.lock().as_slice(), ["a:x", "b:x"]);

        assert!(registry.unregister("a", registrations[0]));
        assert!(!registry.unregister("a", registrations[0]));
        assert!(!registry.holds("a"));
        assert!(!registry.unregister("b", registrations[0]));
        assert!(registry.holds("b"));
    }

    #[test]
    fn id_is_held_until_its_last_registration_goes() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = LocalRegistry::new();
        let mut registrations = Vec::new();
        for _ in 0..2 {
            let count = count.clone();
            registrations.push(registry.register(
                "p".to_string(),
                Arc::new(move |_: &str, _: &str| *count.lock() += 1),
            ));
        }

        let delivered = registry.deliver(&Notification {
            ids: BTreeSet::from(["p".to_string()]),
            payload: "x".into(),
        });
        assert_eq!(delivered.len(), 1);
        assert_eq!(*count.lock(), 2);

        assert!(!registry.unregister("p", registrations[0]));
        assert!(registry.holds("p"));
        assert!(registry.unregister("p", registrations[1]));
        assert!(!registry.holds("p"));
    }

    #[test]
    fn shared_set_adds_and_removes() {
        let store = LocalSlots::new();
        add_push_id(&store, "ids", "p1").unwrap();
        add_push_id(&store, "ids", "p2").unwrap();
        add_push_id(&store, "ids", "p1").unwrap();
        assert_eq!(store.get("ids"), r#"["p1","p2"]"#);

        remove_push_ids(&store, "ids", &["p1".to_string()]).unwrap();
        assert_eq!(read_push_ids(&store, "ids").len(), 1);
        remove_push_ids(&store, "ids", &["p2".to_string()]).unwrap();
        assert!(!store.exists("ids"));

        store.set("ids", "garbage").unwrap();
        assert!(read_push_ids(&store, "ids").is_empty());
    }
}
