//! MQTT v3.1.1 broker
//!
//! ```rust,no_run
//! use mqtt3::broker::MqttBroker;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut broker = MqttBroker::bind("0.0.0.0:1883").await?;
//!     let shutdown = broker.shutdown_sender();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = shutdown.send(());
//!     });
//!     broker.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client_handler;
pub mod config;
pub mod router;
pub mod server;
pub mod session;
pub mod stats;
pub mod storage;
pub mod transport;

pub use auth::{AllowAllAuthProvider, AuthProvider, AuthResult, Credentials};
pub use config::BrokerConfig;
pub use router::MessageRouter;
pub use server::MqttBroker;
pub use session::{ExpiredSession, OpenedSession, Session, SessionRegistry, StoredMessage};
pub use stats::{BrokerStats, StatsSnapshot};
pub use storage::{MemoryBackend, RetainedMessage, StorageBackend};

pub use crate::QoS;
