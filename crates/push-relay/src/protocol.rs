use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LISTEN_OP: &str = "listen";

/// Heartbeat exchanged with the server: last server timestamp and the interval in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub interval: u64,
}

/// Body of one long-poll request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    pub heartbeat: Heartbeat,
    pub op: &'static str,
    pub sequence_number: u64,
    pub window: String,
    pub push_ids: Vec<String>,
}

/// A notification as it travels between windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub ids: BTreeSet<String>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
struct WireNotification {
    #[serde(rename = "push-ids", alias = "push_ids", default)]
    push_ids: Vec<String>,
    #[serde(default)]
    payload: Value,
}

impl From<WireNotification> for Notification {
    fn from(wire: WireNotification) -> Self {
        let payload = match wire.payload {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Notification {
            ids: wire.push_ids.into_iter().collect(),
            payload,
        }
    }
}

/// Keep-open response body. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ListenBody {
    #[serde(default)]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub heartbeat: Option<Heartbeat>,
    #[serde(default)]
    notifications: Vec<WireNotification>,
    #[serde(default)]
    configuration: Option<Value>,
    #[serde(default)]
    browser: Option<String>,
    #[serde(default)]
    noop: Option<Value>,
    #[serde(default, rename = "back-off", alias = "back_off")]
    back_off: Option<u64>,
}

/// Commands the server can send, dispatched by name.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Noop,
    Notifications(Vec<Notification>),
    Configuration(Value),
    Browser(String),
    BackOff(Duration),
}

impl ListenBody {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Splits the body into its commands, in dispatch order.
    pub fn into_commands(self) -> Vec<ServerCommand> {
        let mut commands = Vec::new();
        if let Some(browser) = self.browser.filter(|b| !b.is_empty()) {
            commands.push(ServerCommand::Browser(browser));
        }
        if let Some(configuration) = self.configuration {
            commands.push(ServerCommand::Configuration(configuration));
        }
        let notifications: Vec<Notification> = self
            .notifications
            .into_iter()
            .map(Notification::from)
            .filter(|n| !n.ids.is_empty())
            .collect();
        if !notifications.is_empty() {
            commands.push(ServerCommand::Notifications(notifications));
        }
        if self.noop.is_some() {
            commands.push(ServerCommand::Noop);
        }
        if let Some(delay) = self.back_off {
            commands.push(ServerCommand::BackOff(Duration::from_millis(delay)));
        }
        commands
    }
}
