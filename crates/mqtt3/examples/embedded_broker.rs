//! Runs a broker inside an application with a custom authorization rule and
//! in-memory persistence.
//!
//! ```bash
//! RUST_LOG=mqtt3=debug cargo run --example embedded_broker
//! ```

use mqtt3::broker::{
    AuthProvider, AuthResult, BrokerConfig, Credentials, MemoryBackend, MqttBroker,
};
use mqtt3::ConnectReturnCode;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Only clients whose id starts with `sensor-` may connect.
struct SensorsOnly;

impl AuthProvider for SensorsOnly {
    fn authorize<'a>(
        &'a self,
        client_id: &'a str,
        _credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = mqtt3::Result<AuthResult>> + Send + 'a>> {
        Box::pin(async move {
            if client_id.starts_with("sensor-") {
                Ok(AuthResult::Accept)
            } else {
                Ok(AuthResult::Reject(ConnectReturnCode::NotAuthorized))
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mqtt3=info")),
        )
        .init();

    let config = BrokerConfig::default()
        .with_bind_address(([127, 0, 0, 1], 1883))
        .with_session_expiry(Duration::from_secs(600))
        .with_max_inflight_messages(16);

    let mut broker = MqttBroker::with_config(config)
        .await?
        .with_auth_provider(Arc::new(SensorsOnly))
        .with_storage(Arc::new(MemoryBackend::new()));

    println!("Broker listening on {:?}", broker.local_addrs());
    println!("Press Ctrl+C to stop");

    let shutdown = broker.shutdown_sender();
    let stats = broker.stats();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown.send(());
    });

    broker.run().await?;

    let snapshot = stats.snapshot();
    println!(
        "Served {} clients, {} messages in, {} out",
        snapshot.clients_total, snapshot.messages_received, snapshot.messages_sent
    );
    Ok(())
}
