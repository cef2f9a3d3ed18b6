#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

//! Sans-I/O core of an MQTT v3.1.1 broker: framing, the packet model, topic
//! matching, the QoS handshake tables and the connection lifecycle.

pub mod codec;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod packet;
pub mod topic_matching;
pub mod types;
pub mod validation;

pub use codec::PacketDecoder;
pub use connection::{CloseEvent, CloseReason, ConnectionState, ConnectionStateMachine};
pub use error::{ErrorKind, MqttError, Result};
pub use handshake::{HandshakeAction, HandshakeState};
pub use keepalive::KeepaliveConfig;
pub use packet::{FixedHeader, MqttPacket, Packet, PacketType};
pub use topic_matching::topic_matches_filter;
pub use types::{ConnectReturnCode, ProtocolVersion, QoS, WillMessage};
pub use validation::{
    is_valid_topic_filter, is_valid_topic_name, validate_client_id, validate_topic_filter,
    validate_topic_name,
};
