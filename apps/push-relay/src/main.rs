use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use push_relay::{
    Clock, HttpTransport, PollTransport, RelayConfig, RelayEvent, SharingMode, SlotBackends,
    WindowBuilder,
};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

mod telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "push-relay",
    author,
    version,
    about = "Runs several relay windows over one in-process origin"
)]
struct Cli {
    /// Long-poll endpoint of the push server.
    #[arg(long, env = "PUSH_RELAY_ENDPOINT")]
    endpoint: Option<String>,

    /// TOML file with relay settings.
    #[arg(long, env = "PUSH_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Opaque token forwarded with every long-poll request.
    #[arg(long, env = "PUSH_RELAY_ACCESS_TOKEN")]
    access_token: Option<String>,

    /// `shared`, `polled` or `local`.
    #[arg(long, env = "PUSH_RELAY_SHARING")]
    sharing: Option<SharingMode>,

    /// Number of windows to run.
    #[arg(long, default_value_t = 2)]
    windows: usize,

    /// Push id to register; repeat for more. Ids are spread over the windows.
    #[arg(long = "push-id", required = true)]
    push_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init()?;

    let mut config =
        RelayConfig::load(cli.config.as_deref()).context("failed to load relay configuration")?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = Some(endpoint);
    }
    if let Some(token) = cli.access_token {
        config.access_token = Some(token);
    }
    if let Some(sharing) = cli.sharing {
        config.sharing = sharing;
    }

    let endpoint = config
        .endpoint
        .clone()
        .context("no long-poll endpoint configured (--endpoint or PUSH_RELAY_ENDPOINT)")?;
    let endpoint =
        Url::parse(&endpoint).with_context(|| format!("invalid endpoint url {endpoint}"))?;
    let transport: Arc<dyn PollTransport> = Arc::new(HttpTransport::new(endpoint.clone()));
    let backends = SlotBackends::in_process(config.bounded_store_capacity);
    let clock = Clock::new();

    let mut windows = Vec::new();
    for _ in 0..cli.windows.max(1) {
        let window = WindowBuilder::new(config.clone(), backends.clone(), transport.clone())
            .clock(clock)
            .spawn()
            .context("failed to start window")?;
        log_events(window.id().to_string(), window.events());
        windows.push(window);
    }
    info!(
        endpoint = %endpoint,
        windows = windows.len(),
        sharing = ?config.sharing,
        "push relay running"
    );

    let mut registrations = Vec::new();
    for (index, push_id) in cli.push_ids.iter().enumerate() {
        let window = &windows[index % windows.len()];
        let window_id = window.id().to_string();
        let registration = window
            .register(push_id.clone(), move |push_id: &str, payload: &str| {
                info!(window = %window_id, push_id, payload, "notification delivered");
            })
            .await
            .with_context(|| format!("failed to register push id {push_id}"))?;
        registrations.push(registration);
    }

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    drop(registrations);
    for window in &windows {
        window.shutdown().await;
    }
    Ok(())
}

fn log_events(window_id: String, mut events: tokio::sync::broadcast::Receiver<RelayEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RelayEvent::ServerError { status, body }) => {
                    warn!(window = %window_id, status, body = %body, "server error")
                }
                Ok(RelayEvent::ConnectionDown) => warn!(window = %window_id, "connection down"),
                Ok(event) => info!(window = %window_id, event = ?event, "relay event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(window = %window_id, skipped, "event log lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
