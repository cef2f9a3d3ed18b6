pub mod ack_common;
pub mod connack;
pub mod connect;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use crate::encoding::{encode_variable_int, peek_variable_int, variable_int_len};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, BytesMut};

pub use connack::ConnAckPacket;
pub use connect::ConnectPacket;
pub use puback::PubAckPacket;
pub use pubcomp::PubCompPacket;
pub use publish::PublishPacket;
pub use pubrec::PubRecPacket;
pub use pubrel::PubRelPacket;
pub use suback::{SubAckPacket, SubAckReturnCode};
pub use subscribe::{SubscribePacket, TopicFilter};
pub use unsuback::UnsubAckPacket;
pub use unsubscribe::UnsubscribePacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnAck),
            3 => Some(Self::Publish),
            4 => Some(Self::PubAck),
            5 => Some(Self::PubRec),
            6 => Some(Self::PubRel),
            7 => Some(Self::PubComp),
            8 => Some(Self::Subscribe),
            9 => Some(Self::SubAck),
            10 => Some(Self::Unsubscribe),
            11 => Some(Self::UnsubAck),
            12 => Some(Self::PingReq),
            13 => Some(Self::PingResp),
            14 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// The flag nibble this type must carry, or `None` for PUBLISH whose
    /// flags encode DUP, QoS and RETAIN.
    #[must_use]
    pub fn required_flags(self) -> Option<u8> {
        match self {
            Self::Publish => None,
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        encode_variable_int(buf, self.remaining_length)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + variable_int_len(self.remaining_length)
    }

    /// Parses a fixed header from the front of `bytes` without consuming it.
    ///
    /// `Ok(None)` means more bytes are needed. On success the header and its
    /// encoded length are returned. Type and flag checks happen as soon as the
    /// first byte is present so a bad header is rejected before its body
    /// arrives.
    pub fn parse(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&first) = bytes.first() else {
            return Ok(None);
        };
        let packet_type = PacketType::from_u8(first >> 4)
            .ok_or(MqttError::InvalidPacketType(first >> 4))?;
        validate_flags(packet_type, first & 0x0F)?;

        match peek_variable_int(&bytes[1..])? {
            Some((remaining_length, len)) => Ok(Some((
                Self::new(packet_type, first & 0x0F, remaining_length),
                1 + len,
            ))),
            None => Ok(None),
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        match Self::parse(buf.chunk())? {
            Some((header, len)) => {
                buf.advance(len);
                Ok(header)
            }
            None => Err(MqttError::MalformedPacket(
                "Truncated fixed header".to_string(),
            )),
        }
    }
}

fn validate_flags(packet_type: PacketType, flags: u8) -> Result<()> {
    match packet_type.required_flags() {
        Some(required) if required != flags => Err(MqttError::MalformedPacket(format!(
            "Invalid {packet_type:?} flags: expected 0x{required:02X}, got 0x{flags:02X}"
        ))),
        Some(_) => Ok(()),
        None => {
            let qos = (flags >> 1) & 0x03;
            if qos == 3 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH with QoS 3".to_string(),
                ));
            }
            if qos == 0 && flags & 0x08 != 0 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH with QoS 0 must not set DUP".to_string(),
                ));
            }
            Ok(())
        }
    }
}

pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    fn flags(&self) -> u8 {
        0
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    /// Decodes the variable header and payload. `buf` holds exactly
    /// `fixed_header.remaining_length` bytes.
    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self>;

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        let remaining_length = u32::try_from(body.len()).map_err(|_| MqttError::PacketTooLarge {
            size: body.len(),
            max: crate::encoding::MAX_VARIABLE_INT as usize,
        })?;
        FixedHeader::new(self.packet_type(), self.flags(), remaining_length).encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}

/// Every control packet of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<ConnectPacket>),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    /// Decodes a packet body that has been fully buffered.
    pub fn decode_from_body<B: Buf>(fixed_header: &FixedHeader, buf: &mut B) -> Result<Self> {
        validate_flags(fixed_header.packet_type, fixed_header.flags)?;

        let packet = match fixed_header.packet_type {
            PacketType::Connect => {
                Packet::Connect(Box::new(ConnectPacket::decode_body(buf, fixed_header)?))
            }
            PacketType::ConnAck => Packet::ConnAck(ConnAckPacket::decode_body(buf, fixed_header)?),
            PacketType::Publish => Packet::Publish(PublishPacket::decode_body(buf, fixed_header)?),
            PacketType::PubAck => Packet::PubAck(PubAckPacket::decode_body(buf, fixed_header)?),
            PacketType::PubRec => Packet::PubRec(PubRecPacket::decode_body(buf, fixed_header)?),
            PacketType::PubRel => Packet::PubRel(PubRelPacket::decode_body(buf, fixed_header)?),
            PacketType::PubComp => Packet::PubComp(PubCompPacket::decode_body(buf, fixed_header)?),
            PacketType::Subscribe => {
                Packet::Subscribe(SubscribePacket::decode_body(buf, fixed_header)?)
            }
            PacketType::SubAck => Packet::SubAck(SubAckPacket::decode_body(buf, fixed_header)?),
            PacketType::Unsubscribe => {
                Packet::Unsubscribe(UnsubscribePacket::decode_body(buf, fixed_header)?)
            }
            PacketType::UnsubAck => {
                Packet::UnsubAck(UnsubAckPacket::decode_body(buf, fixed_header)?)
            }
            PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect => {
                if fixed_header.remaining_length != 0 {
                    return Err(MqttError::MalformedPacket(format!(
                        "{:?} must have an empty body, got {} bytes",
                        fixed_header.packet_type, fixed_header.remaining_length
                    )));
                }
                match fixed_header.packet_type {
                    PacketType::PingReq => Packet::PingReq,
                    PacketType::PingResp => Packet::PingResp,
                    _ => Packet::Disconnect,
                }
            }
        };

        if buf.has_remaining() {
            return Err(MqttError::MalformedPacket(format!(
                "{} trailing bytes after {:?}",
                buf.remaining(),
                fixed_header.packet_type
            )));
        }
        Ok(packet)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PubAck(p) => p.encode(buf),
            Self::PubRec(p) => p.encode(buf),
            Self::PubRel(p) => p.encode(buf),
            Self::PubComp(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubAck(p) => p.encode(buf),
            Self::PingReq | Self::PingResp | Self::Disconnect => {
                FixedHeader::new(self.packet_type(), 0, 0).encode(buf)
            }
        }
    }
}

impl From<ConnectPacket> for Packet {
    fn from(packet: ConnectPacket) -> Self {
        Packet::Connect(Box::new(packet))
    }
}

impl From<PublishPacket> for Packet {
    fn from(packet: PublishPacket) -> Self {
        Packet::Publish(packet)
    }
}
