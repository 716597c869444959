/// Outcomes a window reports to its embedding layer. Recoverable trouble stays internal
/// until a retry chain runs out, except for the per-attempt `ConnectionTrouble`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The server closed the long-poll on purpose.
    ConnectionStopped { reason: Option<String> },
    /// A long-poll request failed at the network level; `attempt` counts consecutive failures.
    ConnectionTrouble { attempt: usize },
    /// Network retries are exhausted and ownership was given up.
    ConnectionDown,
    /// A window acquired the connection.
    ConnectionReestablished { owner: String },
    /// Server-error retries are exhausted; the connection stays down until reconfigured.
    ServerError { status: u16, body: String },
    /// The window was paused or shut down.
    Stopped,
}
