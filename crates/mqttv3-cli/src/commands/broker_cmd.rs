use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use mqtt3::broker::{BrokerConfig, MqttBroker};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};

#[derive(Args, Debug)]
pub struct BrokerCommand {
    /// Configuration file path (JSON format)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// TCP bind address (e.g., `0.0.0.0:1883` `[::]:1883`) - can be specified multiple times
    #[arg(long, short = 'H', action = ArgAction::Append)]
    pub host: Vec<String>,

    /// Maximum number of concurrent clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Seconds a disconnected persistent session is kept (0 keeps it forever)
    #[arg(long)]
    pub session_expiry: Option<u64>,

    /// Messages queued per session while the client is offline or slow
    #[arg(long)]
    pub max_queued_messages: Option<usize>,

    /// Unacknowledged QoS 1/2 deliveries allowed per session
    #[arg(long)]
    pub max_inflight: Option<usize>,

    /// Disable retained messages
    #[arg(long)]
    pub no_retain: bool,

    /// Reject CONNECT packets with an empty client identifier
    #[arg(long)]
    pub require_client_id: bool,
}

pub async fn execute(cmd: BrokerCommand, verbose: bool, debug: bool) -> Result<()> {
    crate::init_basic_tracing(verbose, debug);

    info!("Starting MQTT v3.1.1 broker...");

    let config = build_config(&cmd)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        "Creating broker with bind addresses: {:?}",
        config.bind_addresses
    );
    let mut broker = MqttBroker::with_config(config.clone())
        .await
        .context("Failed to create MQTT broker")?;

    println!("MQTT v3.1.1 broker starting...");
    println!(
        "  TCP: {}",
        broker
            .local_addrs()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Max clients: {}", config.max_clients);
    println!("  Press Ctrl+C to stop");

    let shutdown = broker.shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("\nReceived Ctrl+C, shutting down gracefully...");
            }
            Err(err) => {
                tracing::error!("Unable to listen for shutdown signal: {}", err);
            }
        }
        let _ = shutdown.send(());
    });

    broker.run().await.context("Broker error")?;

    let stats = broker.stats().snapshot();
    info!(
        clients_total = stats.clients_total,
        messages_received = stats.messages_received,
        messages_sent = stats.messages_sent,
        messages_dropped = stats.messages_dropped,
        "Broker stopped"
    );
    println!("MQTT broker stopped");
    Ok(())
}

/// Starts from the config file (or defaults) and applies command line
/// overrides on top.
fn build_config(cmd: &BrokerCommand) -> Result<BrokerConfig> {
    let mut config = if let Some(config_path) = &cmd.config {
        debug!("Loading configuration from: {:?}", config_path);
        load_config_from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?
    } else {
        BrokerConfig::default()
    };

    if !cmd.host.is_empty() {
        let bind_addrs = cmd
            .host
            .iter()
            .map(|h| {
                h.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid bind address: {h}"))
            })
            .collect::<Result<Vec<_>>>()?;
        config = config.with_bind_addresses(bind_addrs);
    }
    if let Some(max_clients) = cmd.max_clients {
        config = config.with_max_clients(max_clients);
    }
    if let Some(secs) = cmd.session_expiry {
        config = config.with_session_expiry(Duration::from_secs(secs));
    }
    if let Some(max) = cmd.max_queued_messages {
        config = config.with_max_queued_messages(max);
    }
    if let Some(max) = cmd.max_inflight {
        config = config.with_max_inflight_messages(max);
    }
    if cmd.no_retain {
        config = config.with_retain_available(false);
    }
    if cmd.require_client_id {
        config = config.with_allow_anonymous_client_id(false);
    }

    Ok(config)
}

fn load_config_from_file(config_path: &Path) -> Result<BrokerConfig> {
    let contents = std::fs::read_to_string(config_path).context("Failed to read config file")?;

    serde_json::from_str(&contents).context("Failed to parse config file as JSON")
}
