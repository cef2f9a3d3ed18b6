use crate::types::ConnectReturnCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Connection refused: {0:?}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Packet too large: size {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("String too long: {0} bytes exceeds maximum of 65535")]
    StringTooLong(usize),

    #[error("Packet identifier {0} is already in flight")]
    PacketIdInUse(u16),

    #[error("Packet identifier space exhausted")]
    PacketIdExhausted,

    #[error("Too many in-flight QoS 2 messages: limit {0}")]
    InflightLimitExceeded(usize),

    #[error("Keep-alive timeout")]
    KeepAliveTimeout,

    #[error("Timeout")]
    Timeout,

    #[error("Session taken over by a new connection")]
    SessionTakenOver,

    #[error("Server shutting down")]
    ServerShuttingDown,

    #[error("Server at capacity")]
    ServerUnavailable,

    #[error("Client closed connection")]
    ClientClosed,

    #[error("Connection closed by peer")]
    ConnectionClosedByPeer,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse grouping of errors by how the broker must react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bytes on the wire violate the framing rules. Close without a response.
    Malformed,
    /// Well-formed packet that is illegal in the current state. Close.
    ProtocolViolation,
    /// Credentials or client id refused. Answer with a failure CONNACK.
    Authorization,
    /// A configured resource limit was hit. Close.
    ResourceExhausted,
    /// The byte stream failed or timed out.
    Transport,
    /// The connection ended on purpose (DISCONNECT, takeover, shutdown).
    Closed,
    Internal,
}

impl MqttError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedPacket(_)
            | Self::InvalidTopicName(_)
            | Self::InvalidTopicFilter(_)
            | Self::InvalidQoS(_)
            | Self::InvalidPacketType(_)
            | Self::StringTooLong(_)
            | Self::UnsupportedProtocolVersion(_) => ErrorKind::Malformed,
            Self::ProtocolError(_) | Self::PacketIdInUse(_) => ErrorKind::ProtocolViolation,
            Self::AuthenticationFailed
            | Self::NotAuthorized
            | Self::InvalidClientId(_)
            | Self::ConnectionRefused(_) => ErrorKind::Authorization,
            Self::PacketTooLarge { .. }
            | Self::PacketIdExhausted
            | Self::InflightLimitExceeded(_)
            | Self::ServerUnavailable => ErrorKind::ResourceExhausted,
            Self::Io(_) | Self::KeepAliveTimeout | Self::Timeout | Self::ConnectionClosedByPeer => {
                ErrorKind::Transport
            }
            Self::ClientClosed | Self::SessionTakenOver | Self::ServerShuttingDown => {
                ErrorKind::Closed
            }
            Self::Storage(_) | Self::Configuration(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the connection ended without anything going wrong.
    #[must_use]
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ClientClosed | Self::ConnectionClosedByPeer | Self::ServerShuttingDown
        )
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for MqttError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        MqttError::MalformedPacket(format!("Invalid UTF-8: {err}"))
    }
}
