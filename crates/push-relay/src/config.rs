use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use slot_store::{SharingMode, DEFAULT_BOUNDED_CAPACITY};

use crate::{RelayError, RelayResult};

const ENV_PREFIX: &str = "PUSH_RELAY_";

/// Tunables for one window. Field names follow the server's `configuration` command so a
/// pushed object can be merged in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub sharing: SharingMode,
    #[serde(default = "default_polling_period_ms")]
    pub polling_period_ms: u64,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Multipliers of the heartbeat interval, one per network retry.
    #[serde(default = "default_network_retry_timeouts")]
    pub network_error_retry_timeouts: Vec<f64>,
    #[serde(default = "default_network_margin_ms")]
    pub network_margin_ms: u64,
    #[serde(default)]
    pub server_error_handler: ServerErrorHandlerConfig,
    #[serde(default)]
    pub response_timeout_handler: ResponseTimeoutConfig,
    #[serde(default = "default_broadcast_poll_interval_ms")]
    pub broadcast_poll_interval_ms: u64,
    #[serde(default = "default_notification_buffer_bytes")]
    pub notification_buffer_bytes: usize,
    #[serde(default = "default_bounded_store_capacity")]
    pub bounded_store_capacity: usize,
    #[serde(default)]
    pub liveliness: LivelinessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerErrorHandlerConfig {
    #[serde(default)]
    pub delays: DelayList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeoutConfig {
    #[serde(default = "default_empty_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivelinessConfig {
    #[serde(default = "default_liveliness_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_liveliness_rounds")]
    pub max_unconfirmed_rounds: u32,
}

/// Millisecond delays written either as a list or as one string of space/comma separated
/// values (`"1000 2000 4000"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDelays", into = "String")]
pub struct DelayList(Vec<u64>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDelays {
    Text(String),
    List(Vec<u64>),
}

impl DelayList {
    pub fn parse(text: &str) -> RelayResult<Self> {
        let delays = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| RelayError::Config(format!("invalid delay {part:?}")))
            })
            .collect::<RelayResult<Vec<_>>>()?;
        Self::try_from(delays)
    }

    pub fn as_millis(&self) -> &[u64] {
        &self.0
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.0.iter().copied().map(Duration::from_millis).collect()
    }
}

impl TryFrom<Vec<u64>> for DelayList {
    type Error = RelayError;

    fn try_from(delays: Vec<u64>) -> Result<Self, Self::Error> {
        if delays.is_empty() {
            return Err(RelayError::Config("delay list must not be empty".into()));
        }
        Ok(Self(delays))
    }
}

impl TryFrom<RawDelays> for DelayList {
    type Error = RelayError;

    fn try_from(raw: RawDelays) -> Result<Self, Self::Error> {
        match raw {
            RawDelays::Text(text) => Self::parse(&text),
            RawDelays::List(list) => Self::try_from(list),
        }
    }
}

impl From<DelayList> for String {
    fn from(list: DelayList) -> Self {
        list.0
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for DelayList {
    fn default() -> Self {
        Self(vec![1000, 2000, 4000])
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
        }
    }
}

impl Default for ServerErrorHandlerConfig {
    fn default() -> Self {
        Self {
            delays: DelayList::default(),
        }
    }
}

impl Default for ResponseTimeoutConfig {
    fn default() -> Self {
        Self {
            retries: default_empty_retries(),
        }
    }
}

impl Default for LivelinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_liveliness_interval_ms(),
            max_unconfirmed_rounds: default_liveliness_rounds(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_token: None,
            namespace: default_namespace(),
            sharing: SharingMode::default(),
            polling_period_ms: default_polling_period_ms(),
            heartbeat: HeartbeatConfig::default(),
            network_error_retry_timeouts: default_network_retry_timeouts(),
            network_margin_ms: default_network_margin_ms(),
            server_error_handler: ServerErrorHandlerConfig::default(),
            response_timeout_handler: ResponseTimeoutConfig::default(),
            broadcast_poll_interval_ms: default_broadcast_poll_interval_ms(),
            notification_buffer_bytes: default_notification_buffer_bytes(),
            bounded_store_capacity: default_bounded_store_capacity(),
            liveliness: LivelinessConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> RelayResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| RelayError::Config(err.to_string()))?;
        config.validated()
    }

    /// Defaults, then the optional TOML file, then `PUSH_RELAY_*` environment overrides.
    pub fn load(path: Option<&Path>) -> RelayResult<Self> {
        let config = match path {
            Some(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|source| RelayError::ConfigFile {
                        path: path.display().to_string(),
                        source,
                    })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.with_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Applies overrides looked up by unprefixed variable name (`ENDPOINT`, `SHARING`, ...).
    pub fn with_overrides<F>(mut self, lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| {
            lookup(name).and_then(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };
        if let Some(endpoint) = lookup("ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(namespace) = lookup("NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(sharing) = lookup("SHARING") {
            self.sharing = sharing.parse().map_err(RelayError::Config)?;
        }
        if let Some(interval) = lookup("HEARTBEAT_INTERVAL_MS") {
            self.heartbeat.interval = parse_number("HEARTBEAT_INTERVAL_MS", &interval)?;
        }
        if let Some(period) = lookup("POLLING_PERIOD_MS") {
            self.polling_period_ms = parse_number("POLLING_PERIOD_MS", &period)?;
        }
        if let Some(delays) = lookup("SERVER_ERROR_DELAYS") {
            self.server_error_handler.delays = DelayList::parse(&delays)?;
        }
        self.validated()
    }

    /// Merges a server-pushed `configuration` object. Returns whether anything changed.
    pub fn merge_server_configuration(&mut self, update: &Value) -> RelayResult<bool> {
        let Value::Object(_) = update else {
            return Err(RelayError::Config(
                "server configuration must be an object".into(),
            ));
        };
        let mut current = serde_json::to_value(&*self)?;
        merge_json(&mut current, update);
        let merged: RelayConfig = serde_json::from_value(current)?;
        let merged = merged.validated()?;
        let changed = merged != *self;
        *self = merged;
        Ok(changed)
    }

    pub(crate) fn validated(self) -> RelayResult<Self> {
        if self.polling_period_ms == 0 {
            return Err(RelayError::Config("polling_period_ms must be positive".into()));
        }
        if self.heartbeat.interval == 0 {
            return Err(RelayError::Config("heartbeat.interval must be positive".into()));
        }
        if self.broadcast_poll_interval_ms == 0 || self.liveliness.interval_ms == 0 {
            return Err(RelayError::Config("poll intervals must be positive".into()));
        }
        if self
            .network_error_retry_timeouts
            .iter()
            .any(|m| !m.is_finite() || *m < 0.0)
        {
            return Err(RelayError::Config(
                "network_error_retry_timeouts must be non-negative numbers".into(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(RelayError::Config("namespace must not be empty".into()));
        }
        Ok(self)
    }

    pub fn polling_period(&self) -> Duration {
        Duration::from_millis(self.polling_period_ms)
    }

    pub fn broadcast_poll_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_poll_interval_ms)
    }

    pub fn liveliness_interval(&self) -> Duration {
        Duration::from_millis(self.liveliness.interval_ms)
    }

    /// Network retry delays for a heartbeat interval: `multiplier * interval + margin`.
    pub fn network_retry_intervals(&self, heartbeat_interval_ms: u64) -> Vec<Duration> {
        self.network_error_retry_timeouts
            .iter()
            .map(|multiplier| {
                let scaled = (multiplier * heartbeat_interval_ms as f64).round() as u64;
                Duration::from_millis(scaled + self.network_margin_ms)
            })
            .collect()
    }

    pub fn server_error_delays(&self) -> Vec<Duration> {
        self.server_error_handler.delays.durations()
    }

    /// Upper bound for one long-poll request before it counts as a network failure.
    pub fn request_timeout(&self, heartbeat_interval_ms: u64) -> Duration {
        Duration::from_millis(heartbeat_interval_ms + self.network_margin_ms)
    }
}

fn merge_json(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, update) => *target = update.clone(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> RelayResult<T> {
    value
        .parse()
        .map_err(|_| RelayError::Config(format!("{ENV_PREFIX}{name} must be a number")))
}

fn default_namespace() -> String {
    "push".to_string()
}

fn default_polling_period_ms() -> u64 {
    1000
}

fn default_heartbeat_interval() -> u64 {
    6500
}

fn default_network_retry_timeouts() -> Vec<f64> {
    vec![1.0, 1.0, 1.0, 2.0, 2.0, 3.0]
}

fn default_network_margin_ms() -> u64 {
    5000
}

fn default_empty_retries() -> u32 {
    3
}

fn default_broadcast_poll_interval_ms() -> u64 {
    300
}

fn default_notification_buffer_bytes() -> usize {
    DEFAULT_BOUNDED_CAPACITY / 2
}

fn default_bounded_store_capacity() -> usize {
    DEFAULT_BOUNDED_CAPACITY
}

fn default_liveliness_interval_ms() -> u64 {
    10_000
}

fn default_liveliness_rounds() -> u32 {
    5
}
