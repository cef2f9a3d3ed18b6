//! Server side connection lifecycle.
//!
//! `AwaitingConnect -> Connected -> Disconnecting -> Closed`. The machine
//! decides which inbound packet types are legal and produces exactly one
//! [`CloseEvent`] when the connection reaches `Closed`, flagging whether the
//! session's last will has to be published.

use crate::error::{ErrorKind, MqttError, Result};
use crate::keepalive::KeepaliveConfig;
use crate::packet::PacketType;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    AwaitingConnect,
    Connected,
    Disconnecting,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// DISCONNECT received.
    ClientDisconnect,
    ProtocolViolation(String),
    Malformed(String),
    KeepAliveTimeout,
    ConnectTimeout,
    Transport(String),
    AuthorizationFailed,
    ResourceExhausted(String),
    SessionTakenOver,
    ServerShutdown,
}

impl CloseReason {
    /// Graceful closes never publish the will.
    #[must_use]
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::ClientDisconnect | Self::ServerShutdown)
    }

    #[must_use]
    pub fn from_error(error: &MqttError) -> Self {
        match error {
            MqttError::ClientClosed => Self::ClientDisconnect,
            MqttError::KeepAliveTimeout => Self::KeepAliveTimeout,
            MqttError::Timeout => Self::ConnectTimeout,
            MqttError::SessionTakenOver => Self::SessionTakenOver,
            MqttError::ServerShuttingDown => Self::ServerShutdown,
            MqttError::ConnectionClosedByPeer => Self::Transport("connection closed by peer".into()),
            other => match other.kind() {
                ErrorKind::Malformed => Self::Malformed(other.to_string()),
                ErrorKind::ProtocolViolation => Self::ProtocolViolation(other.to_string()),
                ErrorKind::Authorization => Self::AuthorizationFailed,
                ErrorKind::ResourceExhausted => Self::ResourceExhausted(other.to_string()),
                ErrorKind::Transport | ErrorKind::Closed | ErrorKind::Internal => {
                    Self::Transport(other.to_string())
                }
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub reason: CloseReason,
    /// Set for every ungraceful close of a connection that had been accepted.
    pub publish_will: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    keepalive: KeepaliveConfig,
    keep_alive_secs: u16,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(KeepaliveConfig::default())
    }
}

impl ConnectionStateMachine {
    #[must_use]
    pub fn new(keepalive: KeepaliveConfig) -> Self {
        Self {
            state: ConnectionState::AwaitingConnect,
            keepalive,
            keep_alive_secs: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Checks that an inbound packet type is legal in the current state.
    pub fn check_inbound(&self, packet_type: PacketType) -> Result<()> {
        match self.state {
            ConnectionState::AwaitingConnect => {
                if packet_type == PacketType::Connect {
                    Ok(())
                } else {
                    Err(MqttError::ProtocolError(format!(
                        "Expected CONNECT, received {packet_type:?}"
                    )))
                }
            }
            ConnectionState::Connected => match packet_type {
                PacketType::Publish
                | PacketType::PubAck
                | PacketType::PubRec
                | PacketType::PubRel
                | PacketType::PubComp
                | PacketType::Subscribe
                | PacketType::Unsubscribe
                | PacketType::PingReq
                | PacketType::Disconnect => Ok(()),
                PacketType::Connect => Err(MqttError::ProtocolError(
                    "Duplicate CONNECT".to_string(),
                )),
                other => Err(MqttError::ProtocolError(format!(
                    "{other:?} is not accepted from a client"
                ))),
            },
            ConnectionState::Disconnecting | ConnectionState::Closed => Err(
                MqttError::ProtocolError(format!("{packet_type:?} received after close")),
            ),
        }
    }

    /// CONNACK with return code 0 has been written.
    pub fn on_connect_accepted(&mut self, keep_alive_secs: u16) -> Result<()> {
        if self.state != ConnectionState::AwaitingConnect {
            return Err(MqttError::ProtocolError(format!(
                "Connection accepted in state {:?}",
                self.state
            )));
        }
        self.keep_alive_secs = keep_alive_secs;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    pub fn on_disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnecting;
        }
    }

    /// Moves to `Closed`. Returns the close event the first time only.
    pub fn close(&mut self, reason: CloseReason) -> Option<CloseEvent> {
        let previous = self.state;
        if previous == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;

        let graceful = previous == ConnectionState::Disconnecting || reason.is_graceful();
        Some(CloseEvent {
            publish_will: !graceful && previous == ConnectionState::Connected,
            reason,
        })
    }

    #[must_use]
    pub fn keep_alive_secs(&self) -> u16 {
        self.keep_alive_secs
    }

    /// How long the connection may stay silent, `None` without keep-alive.
    #[must_use]
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keepalive.timeout_duration(self.keep_alive_secs)
    }

    #[must_use]
    pub fn is_keep_alive_expired(&self, idle: Duration) -> bool {
        self.state == ConnectionState::Connected
            && self.keepalive.is_expired(self.keep_alive_secs, idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> ConnectionStateMachine {
        let mut machine = ConnectionStateMachine::default();
        machine.on_connect_accepted(10).unwrap();
        machine
    }

    #[test]
    fn test_only_connect_before_connack() {
        let machine = ConnectionStateMachine::default();
        assert!(machine.check_inbound(PacketType::Connect).is_ok());
        for packet_type in [
            PacketType::Publish,
            PacketType::Subscribe,
            PacketType::PingReq,
            PacketType::Disconnect,
        ] {
            assert!(machine.check_inbound(packet_type).is_err());
        }
    }

    #[test]
    fn test_connected_legality() {
        let machine = connected();
        assert!(machine.check_inbound(PacketType::Publish).is_ok());
        assert!(machine.check_inbound(PacketType::PubRel).is_ok());
        assert!(machine.check_inbound(PacketType::Disconnect).is_ok());
        assert!(machine.check_inbound(PacketType::Connect).is_err());
        assert!(machine.check_inbound(PacketType::ConnAck).is_err());
        assert!(machine.check_inbound(PacketType::SubAck).is_err());
        assert!(machine.check_inbound(PacketType::PingResp).is_err());
    }

    #[test]
    fn test_graceful_disconnect_skips_will() {
        let mut machine = connected();
        machine.on_disconnect();
        assert_eq!(machine.state(), ConnectionState::Disconnecting);
        let event = machine.close(CloseReason::ClientDisconnect).unwrap();
        assert!(!event.publish_will);
        assert!(machine.state().is_closed());
    }

    #[test]
    fn test_ungraceful_paths_publish_will() {
        for reason in [
            CloseReason::KeepAliveTimeout,
            CloseReason::Transport("reset".into()),
            CloseReason::ProtocolViolation("dup".into()),
            CloseReason::Malformed("flags".into()),
            CloseReason::SessionTakenOver,
        ] {
            let mut machine = connected();
            let event = machine.close(reason).unwrap();
            assert!(event.publish_will);
        }
    }

    #[test]
    fn test_close_before_connack_has_no_will() {
        let mut machine = ConnectionStateMachine::default();
        let event = machine.close(CloseReason::Malformed("name".into())).unwrap();
        assert!(!event.publish_will);
    }

    #[test]
    fn test_close_emits_once() {
        let mut machine = connected();
        assert!(machine.close(CloseReason::KeepAliveTimeout).is_some());
        assert!(machine.close(CloseReason::KeepAliveTimeout).is_none());
    }

    #[test]
    fn test_keep_alive_window() {
        let machine = connected();
        assert_eq!(machine.keep_alive_timeout(), Some(Duration::from_secs(15)));
        assert!(!machine.is_keep_alive_expired(Duration::from_secs(14)));
        assert!(machine.is_keep_alive_expired(Duration::from_secs(16)));
    }

    #[test]
    fn test_close_reason_from_error() {
        assert_eq!(
            CloseReason::from_error(&MqttError::KeepAliveTimeout),
            CloseReason::KeepAliveTimeout
        );
        assert!(matches!(
            CloseReason::from_error(&MqttError::MalformedPacket("x".into())),
            CloseReason::Malformed(_)
        ));
        assert!(matches!(
            CloseReason::from_error(&MqttError::PacketIdInUse(3)),
            CloseReason::ProtocolViolation(_)
        ));
        assert!(matches!(
            CloseReason::from_error(&MqttError::InflightLimitExceeded(1)),
            CloseReason::ResourceExhausted(_)
        ));
        assert!(matches!(
            CloseReason::from_error(&MqttError::Io("reset".into())),
            CloseReason::Transport(_)
        ));
    }
}
