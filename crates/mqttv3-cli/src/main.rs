//! `mqttv3` - command line front end for the MQTT v3.1.1 broker.
//!
//! ```bash
//! # Listen on the default port
//! mqttv3 broker
//!
//! # Load settings from JSON, override the listener, log at debug level
//! mqttv3 --verbose broker --config broker.json --host 127.0.0.1:1883
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::broker_cmd::{self, BrokerCommand};

#[derive(Parser)]
#[command(name = "mqttv3", version, about = "MQTT v3.1.1 broker")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Enable trace logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker until Ctrl+C
    Broker(BrokerCommand),
}

/// `RUST_LOG` wins over the flags when it is set.
pub(crate) fn init_basic_tracing(verbose: bool, debug: bool) {
    let default_level = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mqtt3={default_level},mqttv3={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Broker(cmd) => broker_cmd::execute(cmd, cli.verbose, cli.debug).await,
    }
}
