//! Acknowledgment handshakes for QoS 1 and QoS 2, as pure transition
//! functions.
//!
//! Each function looks at one inbound event plus the state currently recorded
//! for its packet identifier and returns the actions the caller must perform.
//! The caller owns the state tables; nothing here does I/O.

use crate::error::{MqttError, Result};
use crate::packet::{Packet, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket};
use crate::types::QoS;
use serde::{Deserialize, Serialize};

/// State of one in-flight packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    /// Outbound QoS 1 PUBLISH sent.
    AwaitingPubAck,
    /// Outbound QoS 2 PUBLISH sent.
    AwaitingPubRec,
    /// Inbound QoS 2 PUBLISH received and PUBREC sent.
    AwaitingPubRel,
    /// Outbound PUBREL sent.
    AwaitingPubComp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Hand the inbound message to the router.
    Deliver,
    SendPubAck { packet_id: u16 },
    SendPubRec { packet_id: u16 },
    SendPubRel { packet_id: u16 },
    SendPubComp { packet_id: u16 },
    TrackIncoming { packet_id: u16 },
    ReleaseIncoming { packet_id: u16 },
    TrackOutgoing { packet_id: u16, state: HandshakeState },
    CompleteOutgoing { packet_id: u16 },
}

impl HandshakeAction {
    /// The packet to write for `Send*` actions.
    #[must_use]
    pub fn to_packet(&self) -> Option<Packet> {
        match *self {
            Self::SendPubAck { packet_id } => Some(Packet::PubAck(PubAckPacket::new(packet_id))),
            Self::SendPubRec { packet_id } => Some(Packet::PubRec(PubRecPacket::new(packet_id))),
            Self::SendPubRel { packet_id } => Some(Packet::PubRel(PubRelPacket::new(packet_id))),
            Self::SendPubComp { packet_id } => {
                Some(Packet::PubComp(PubCompPacket::new(packet_id)))
            }
            _ => None,
        }
    }
}

/// Inbound PUBLISH.
///
/// `awaiting_pubrel` tells whether the identifier already has an unreleased
/// QoS 2 exchange. A repeated QoS 2 PUBLISH is acknowledged again but not
/// delivered again. A QoS 1 PUBLISH reusing such an identifier is a protocol
/// violation.
pub fn handle_incoming_publish(
    qos: QoS,
    packet_id: Option<u16>,
    awaiting_pubrel: bool,
) -> Result<Vec<HandshakeAction>> {
    let packet_id = match (qos, packet_id) {
        (QoS::AtMostOnce, _) => return Ok(vec![HandshakeAction::Deliver]),
        (_, Some(packet_id)) => packet_id,
        (_, None) => {
            return Err(MqttError::ProtocolError(format!(
                "PUBLISH with {qos:?} has no packet identifier"
            )))
        }
    };

    match qos {
        QoS::AtLeastOnce if awaiting_pubrel => Err(MqttError::PacketIdInUse(packet_id)),
        QoS::AtLeastOnce => Ok(vec![
            HandshakeAction::Deliver,
            HandshakeAction::SendPubAck { packet_id },
        ]),
        _ if awaiting_pubrel => Ok(vec![HandshakeAction::SendPubRec { packet_id }]),
        _ => Ok(vec![
            HandshakeAction::Deliver,
            HandshakeAction::TrackIncoming { packet_id },
            HandshakeAction::SendPubRec { packet_id },
        ]),
    }
}

/// Inbound PUBREL. Unknown identifiers still get a PUBCOMP so a client
/// retrying after a broker restart can finish its exchange.
#[must_use]
pub fn handle_incoming_pubrel(packet_id: u16, awaiting_pubrel: bool) -> Vec<HandshakeAction> {
    if awaiting_pubrel {
        vec![
            HandshakeAction::ReleaseIncoming { packet_id },
            HandshakeAction::SendPubComp { packet_id },
        ]
    } else {
        vec![HandshakeAction::SendPubComp { packet_id }]
    }
}

/// Outbound PUBLISH about to be written.
#[must_use]
pub fn handle_outgoing_publish(qos: QoS, packet_id: u16) -> Vec<HandshakeAction> {
    match qos {
        QoS::AtMostOnce => vec![],
        QoS::AtLeastOnce => vec![HandshakeAction::TrackOutgoing {
            packet_id,
            state: HandshakeState::AwaitingPubAck,
        }],
        QoS::ExactlyOnce => vec![HandshakeAction::TrackOutgoing {
            packet_id,
            state: HandshakeState::AwaitingPubRec,
        }],
    }
}

#[must_use]
pub fn handle_incoming_puback(packet_id: u16, state: Option<HandshakeState>) -> Vec<HandshakeAction> {
    match state {
        Some(HandshakeState::AwaitingPubAck) => {
            vec![HandshakeAction::CompleteOutgoing { packet_id }]
        }
        _ => vec![],
    }
}

/// Inbound PUBREC. A repeated PUBREC while waiting for PUBCOMP re-sends the
/// PUBREL.
#[must_use]
pub fn handle_incoming_pubrec(packet_id: u16, state: Option<HandshakeState>) -> Vec<HandshakeAction> {
    match state {
        Some(HandshakeState::AwaitingPubRec | HandshakeState::AwaitingPubComp) => vec![
            HandshakeAction::TrackOutgoing {
                packet_id,
                state: HandshakeState::AwaitingPubComp,
            },
            HandshakeAction::SendPubRel { packet_id },
        ],
        _ => vec![],
    }
}

#[must_use]
pub fn handle_incoming_pubcomp(
    packet_id: u16,
    state: Option<HandshakeState>,
) -> Vec<HandshakeAction> {
    match state {
        Some(HandshakeState::AwaitingPubComp) => {
            vec![HandshakeAction::CompleteOutgoing { packet_id }]
        }
        _ => vec![],
    }
}
