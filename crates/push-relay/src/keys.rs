/// Slot names used by one logical client, all prefixed with its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotKeys {
    pub sequence: String,
    pub lease: String,
    pub owner: String,
    pub push_ids: String,
    pub browser: String,
    /// Single latest record, instant backend.
    pub notification: String,
    /// Pending record buffer, polled backend.
    pub notifications: String,
    pub alive_ping: String,
    pub alive_pong: String,
}

impl SlotKeys {
    pub fn new(namespace: &str) -> Self {
        let key = |name: &str| format!("{namespace}.{name}");
        Self {
            sequence: key("sequence"),
            lease: key("lease"),
            owner: key("owner"),
            push_ids: key("push_ids"),
            browser: key("browser"),
            notification: key("notification"),
            notifications: key("notifications"),
            alive_ping: key("alive.ping"),
            alive_pong: key("alive.pong"),
        }
    }
}
