//! Push Relay: keeps exactly one long-poll connection open per logical client.
//!
//! Many windows of the same client share an origin. They agree through shared slots on a
//! single owner that holds the blocking connection to the push server, and the owner fans the
//! notifications it receives out to every window.
//!
//! Responsibilities:
//! - electing and renewing connection ownership ([`ownership`])
//! - driving the long-poll request loop and its retry chains ([`connection`], [`retry_chain`])
//! - broadcasting notifications across windows ([`broadcast`])
//! - expiring push ids no window answers for anymore ([`liveliness`])
//!
//! A [`Window`] runs all of the above for one execution context on a single driver task.

use thiserror::Error;

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod connection;
pub mod events;
pub mod keys;
pub mod liveliness;
pub mod ownership;
pub mod protocol;
pub mod registry;
pub mod retry_chain;
pub mod transport;
pub mod window;

pub use clock::Clock;
pub use config::RelayConfig;
pub use events::RelayEvent;
pub use keys::SlotKeys;
pub use ownership::OwnershipState;
pub use protocol::Notification;
pub use transport::{HttpTransport, ListenResponse, PollTransport, TransportError};
pub use window::{PushRegistration, Window, WindowBuilder};

pub use slot_store::{SharingMode, SlotBackends};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read configuration file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("slot store error: {0}")]
    Slot(#[from] slot_store::SlotError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("window driver is no longer running")]
    Closed,
}

pub type RelayResult<T> = Result<T, RelayError>;
