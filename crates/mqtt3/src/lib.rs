//! # MQTT v3.1.1 broker
//!
//! An async publish/subscribe broker built on the sans-I/O
//! [`mqtt3_protocol`] crate. Each accepted connection runs as its own Tokio
//! task; sessions and the topic router are shared through the
//! [`broker::MqttBroker`] coordinator.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt3::broker::{BrokerConfig, MqttBroker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::default()
//!         .with_bind_address(([127, 0, 0, 1], 1883))
//!         .with_max_clients(1000);
//!     let mut broker = MqttBroker::with_config(config).await?;
//!     broker.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Any byte stream can be served, which is how the integration tests drive
//! the broker without sockets:
//!
//! ```rust,no_run
//! use mqtt3::broker::{BrokerConfig, MqttBroker};
//!
//! # async fn demo() -> mqtt3::Result<()> {
//! let broker = MqttBroker::new(BrokerConfig::default())?;
//! let (client_side, server_side) = tokio::io::duplex(4096);
//! broker.serve_connection(server_side, None);
//! # drop(client_side);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub use mqtt3_protocol::{
    codec, connection, encoding, error, handshake, keepalive, packet, topic_matching, types,
    validation,
};

pub mod broker;

pub use mqtt3_protocol::{
    CloseReason, ConnectReturnCode, ErrorKind, MqttError, Packet, ProtocolVersion, QoS, Result,
    WillMessage,
};
